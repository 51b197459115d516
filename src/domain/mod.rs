//! Domain layer: core entities and business rules.

pub mod conversation;
pub mod conversation_list;
pub mod events;
pub mod notification;
pub mod session;

