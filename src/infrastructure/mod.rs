//! Adapters for the domain ports.

#[cfg(feature = "http-gateway")]
pub mod backend_api;
pub mod channel_ui;
#[cfg(feature = "http-gateway")]
pub mod http;
pub mod scripted;
