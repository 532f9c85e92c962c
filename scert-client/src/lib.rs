pub mod client;
pub mod config;

pub use client::{HandshakeReport, ScertClient};
pub use config::ClientConfig;
