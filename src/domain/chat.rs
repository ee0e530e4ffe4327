use std::net::SocketAddr;
use crate::domain::players::PlayerManager;
use crate::state::events::{ChatMessage, Outbox, ServerEvent};

/// Blank lines whispered by `/clear`
const CLEAR_LINES: usize = 25;

/// Follow-up the engine has to perform for a chat line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    None,
    /// `/kill`: the sender wants to die
    Kill(u64),
}

/// Route a validated chat message: slash commands are handled here,
/// everything else is broadcast.
pub fn handle_chat_message(
    mut msg: ChatMessage,
    addr: SocketAddr,
    sender: Option<u64>,
    players: &PlayerManager,
    outbox: &mut Outbox,
) -> ChatAction {
    if msg.message.starts_with('/') {
        return run_command(&msg.message, addr, sender, players, outbox);
    }

    if msg.message.starts_with('>') {
        msg.message = format!("&2{}", msg.message);
    }
    log::info!("[chat] {}: {}", msg.name, msg.message);
    outbox.broadcast(ServerEvent::ChatMsg(msg));
    ChatAction::None
}

fn run_command(
    message: &str,
    addr: SocketAddr,
    sender: Option<u64>,
    players: &PlayerManager,
    outbox: &mut Outbox,
) -> ChatAction {
    let command = message[1..]
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    let sender_name = sender.and_then(|id| players.get(id)).map(|p| p.name.clone());

    match command.as_str() {
        "help" => outbox.whisper_chat(addr, format!("{} -> nah i'm good", message)),
        "kill" => {
            if let (Some(id), Some(name)) = (sender, sender_name) {
                outbox.broadcast_chat(format!("{} killed themselves", name));
                return ChatAction::Kill(id);
            }
        }
        "thumbsup" | "thumbsdown" | "octopus" => {
            if let Some(name) = sender_name {
                let emoji = match command.as_str() {
                    "thumbsup" => "👍",
                    "thumbsdown" => "👎",
                    _ => "🐙",
                };
                outbox.broadcast_chat(format!("{}: {}", name, emoji));
            }
        }
        "ping" => outbox.whisper_chat(addr, format!("{} -> pong!", message)),
        "version" => outbox.whisper_chat(addr, format!("{} -> candiru {}", message, players.server_version())),
        "clear" => {
            for _ in 0..CLEAR_LINES {
                outbox.whisper_chat(addr, " ");
            }
            outbox.whisper_chat(addr, format!("{} -> cleared chat", message));
        }
        _ => outbox.whisper_chat(addr, format!("{} -> unknown command", message)),
    }
    ChatAction::None
}
