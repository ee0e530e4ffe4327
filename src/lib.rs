pub mod domain;
pub mod gamemode;
pub mod handlers;
pub mod peers;
pub mod physics;
pub mod server;
pub mod state;
pub mod tick;
pub mod utils;
