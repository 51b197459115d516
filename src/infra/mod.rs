//! Infrastructure layer: adapters for config, storage, and OS integrations.

pub mod config;
pub mod contracts;
pub mod error;
pub mod kv_store;
pub mod logging;
pub mod secrets;
pub mod storage_layout;
