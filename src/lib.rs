//! Keyed reverse proxy.
//!
//! Callers address `/{proxykey}/...`; the key is resolved against a static
//! target table and the request is rewritten and forwarded to that backend.

pub mod error;
pub mod http_client;
pub mod proxy_service;
pub mod route_config;
pub mod server;
pub mod std_logger;
pub mod target_table;
pub mod throttle;
