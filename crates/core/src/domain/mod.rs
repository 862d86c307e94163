pub mod entity;
pub mod event;
pub mod message;
