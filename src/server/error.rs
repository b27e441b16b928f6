//! Errors raised when starting the server

use std::num::ParseIntError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StartError {
    #[error("Invalid port: {0}")]
    InvalidPort(#[source] ParseIntError),

    #[error("Invalid host '{host}'")]
    InvalidHost {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot bind port {port}: {source}")]
    BindPort {
        port: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("Port {port} is out of range")]
    OutOfRangePort { port: i32 },

    #[error("Cannot start server: {0}")]
    Other(#[source] std::io::Error),
}

impl StartError {
    /// Port carried by the error, for port-related failures
    pub fn port(&self) -> Option<i32> {
        match self {
            StartError::BindPort { port, .. } | StartError::OutOfRangePort { port } => Some(*port),
            _ => None,
        }
    }
}
