//! Endpoint addresses for socket sessions.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, VoxError};

/// A parsed session endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host:port`
    Tcp(String),
    /// `unix:///absolute/path.sock`
    Unix(PathBuf),
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(addr) = raw.strip_prefix("tcp://") {
            if addr.is_empty() || !addr.contains(':') {
                return Err(VoxError::TransportUnavailable(format!("Invalid tcp endpoint: {}", raw)));
            }
            return Ok(Endpoint::Tcp(addr.to_string()));
        }
        if let Some(path) = raw.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(VoxError::TransportUnavailable(format!("Invalid unix endpoint: {}", raw)));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        Err(VoxError::TransportUnavailable(format!("Unsupported endpoint scheme: {}", raw)))
    }
}

impl FromStr for Endpoint {
    type Err = VoxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}
