pub mod client;
pub mod dto;
pub mod error;
pub mod server;

pub const DEFAULT_UDS: &str = "/var/run/iotap.sock";
