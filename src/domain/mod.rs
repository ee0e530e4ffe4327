pub mod chat;
pub mod damage;
pub mod items;
pub mod map;
pub mod players;
pub mod props;
pub mod validator;
