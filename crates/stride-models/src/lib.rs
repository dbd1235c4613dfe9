pub mod gateway;
pub mod message;
pub mod notification;
pub mod presence;
