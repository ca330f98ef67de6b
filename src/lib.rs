//! Chaos sessions against Kubernetes pods, driven over HTTP with the
//! session log streamed back as server-sent events.

pub mod chaos;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod logbridge;
pub mod server;
pub mod session;
