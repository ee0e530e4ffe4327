pub mod http;
pub mod models;
pub mod udp;

pub use http::{router, AppState};
pub use udp::handle_udp_packet;
