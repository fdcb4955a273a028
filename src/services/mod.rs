pub mod conversation_service;
pub mod delivery_service;
pub mod gateway;
pub mod health_service;
pub mod message_service;
pub mod rate_limit_service;
pub mod read_state_service;
pub mod room;
pub mod store;
