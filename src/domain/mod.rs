pub mod auth;
pub mod conversation;
pub mod delivery;
pub mod identity;
pub mod message;
pub mod room;
