//! Endpoint addresses in `network!address` form.
//!
//! - `tcp!host!port`, e.g. `tcp!localhost!5640`
//! - `unix!/path/file.sock`

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PineError;

/// A TCP or Unix-domain socket endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Address {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Address::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Address::Unix(path.into())
    }
}

impl FromStr for Address {
    type Err = PineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PineError::InvalidAddress(s.to_string());
        let parts: Vec<&str> = s.splitn(3, '!').collect();

        match parts.as_slice() {
            ["tcp", host, port] if !host.is_empty() => {
                let port = port.parse().map_err(|_| invalid())?;
                Ok(Address::tcp(*host, port))
            }
            ["unix", path] if !path.is_empty() => Ok(Address::unix(*path)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp { host, port } => write!(f, "tcp!{host}!{port}"),
            Address::Unix(path) => write!(f, "unix!{}", path.display()),
        }
    }
}
