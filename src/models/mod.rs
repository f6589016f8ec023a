pub mod event;
pub mod job;
pub mod message;
