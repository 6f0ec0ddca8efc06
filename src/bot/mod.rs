//! Message handling on top of the inbound transport

pub mod handler;
pub mod poller;

pub use handler::{Command, MessageHandler};
pub use poller::Poller;
