//! Use case layer: application workflows and orchestration.

pub mod bootstrap;
pub mod chat_sync;
pub mod client;
pub mod connection;
pub mod context;
pub mod contracts;
pub mod focus;
pub mod login;
pub mod logout;
pub mod notification_gate;
pub mod push;
pub mod session;
pub mod timer;
