//! Library crate for host-scan-rs: bounded TCP connect scanning of one host with
//! banner grabbing and listening-process attribution.
pub mod error;
pub mod inspect;
pub mod logging;
pub mod netdetect;
pub mod ports;
pub mod scanner;
pub mod server;
pub mod transport;
pub mod types;
