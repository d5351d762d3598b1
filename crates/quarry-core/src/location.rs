//! Executor endpoints.
//!
//! A `Location` names one executor process and the address its RPC listener
//! is bound to. Both control calls and split streams use the same address.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    /// Executor name; unique within a topology.
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Location {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.host, self.port)
    }
}

/// Accepts `name=host:port` or a bare `host:port` (the address doubles as the name).
impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, addr) = match s.split_once('=') {
            Some((name, addr)) => (name.trim(), addr.trim()),
            None => (s, s),
        };
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| Error::Location(format!("missing port in '{s}'")))?;
        if name.is_empty() || host.is_empty() {
            return Err(Error::Location(format!("empty name or host in '{s}'")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::Location(format!("bad port in '{s}': {e}")))?;
        Ok(Location::new(name, host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_and_bare_forms() {
        let loc: Location = "exec-1=127.0.0.1:7001".parse().unwrap();
        assert_eq!(loc, Location::new("exec-1", "127.0.0.1", 7001));
        assert_eq!(loc.addr(), "127.0.0.1:7001");

        let bare: Location = "10.0.0.2:9000".parse().unwrap();
        assert_eq!(bare.name, "10.0.0.2:9000");
        assert_eq!(bare.port, 9000);
    }

    #[test]
    fn rejects_missing_port() {
        assert!("exec=localhost".parse::<Location>().is_err());
        assert!("exec=localhost:notaport".parse::<Location>().is_err());
    }
}
