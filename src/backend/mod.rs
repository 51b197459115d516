//! Backend integration layer: HTTP API client and realtime transport.

pub mod http_api;
pub mod ws_transport;
