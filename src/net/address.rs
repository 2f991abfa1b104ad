//! Remote peer addresses.

use std::fmt;
use std::net::SocketAddr;

/// Address of the remote peer of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteAddress {
    /// Host name or IP literal plus port. Eligible for SNI.
    Inet { host: String, port: u16 },
    /// Anything else (unix socket path, in-memory transport name...).
    Opaque(String),
}

impl RemoteAddress {
    pub fn inet(host: impl Into<String>, port: u16) -> Self {
        RemoteAddress::Inet { host: host.into(), port }
    }

    /// Parse `host:port` (`[v6]:port` for IPv6 literals).
    ///
    /// Input that is not a host and a numeric port becomes [`RemoteAddress::Opaque`].
    pub fn parse(input: &str) -> Self {
        if let Ok(addr) = input.parse::<SocketAddr>() {
            return addr.into();
        }
        match input.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.contains(':') => match port.parse::<u16>() {
                Ok(port) => RemoteAddress::inet(host, port),
                Err(_) => RemoteAddress::Opaque(input.to_string()),
            },
            _ => RemoteAddress::Opaque(input.to_string()),
        }
    }

    /// Host and port, if this is an inet address.
    pub fn host_port(&self) -> Option<(&str, u16)> {
        match self {
            RemoteAddress::Inet { host, port } => Some((host, *port)),
            RemoteAddress::Opaque(_) => None,
        }
    }

    pub fn sni_target(&self) -> Option<SniTarget> {
        self.host_port().map(|(host, port)| SniTarget {
            host: host.to_string(),
            port,
        })
    }
}

impl From<SocketAddr> for RemoteAddress {
    fn from(addr: SocketAddr) -> Self {
        RemoteAddress::Inet {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteAddress::Inet { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            RemoteAddress::Inet { host, port } => write!(f, "{}:{}", host, port),
            RemoteAddress::Opaque(name) => f.write_str(name),
        }
    }
}

/// Peer host and port handed to the TLS engine for server-name indication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniTarget {
    pub host: String,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port() {
        assert_eq!(RemoteAddress::parse("example.com:443"), RemoteAddress::inet("example.com", 443));
        assert_eq!(RemoteAddress::parse("127.0.0.1:80"), RemoteAddress::inet("127.0.0.1", 80));
        assert_eq!(RemoteAddress::parse("[::1]:8443"), RemoteAddress::inet("::1", 8443));
    }

    #[test]
    fn parse_falls_back_to_opaque() {
        assert_eq!(
            RemoteAddress::parse("/var/run/app.sock"),
            RemoteAddress::Opaque("/var/run/app.sock".into())
        );
        assert_eq!(RemoteAddress::parse("host:http"), RemoteAddress::Opaque("host:http".into()));
    }

    #[test]
    fn display_brackets_ipv6() {
        assert_eq!(RemoteAddress::inet("::1", 1).to_string(), "[::1]:1");
        assert_eq!(RemoteAddress::inet("a", 2).to_string(), "a:2");
    }

    #[test]
    fn only_inet_has_sni_target() {
        let target = RemoteAddress::inet("a.example", 9).sni_target().unwrap();
        assert_eq!(target.host, "a.example");
        assert_eq!(target.port, 9);
        assert!(RemoteAddress::Opaque("x".into()).sni_target().is_none());
    }
}
