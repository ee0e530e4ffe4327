pub mod commands;
pub mod events;
pub mod player;
pub mod prop;
pub mod server_info;
pub mod server_state;
pub mod vector;
pub mod world_item;
