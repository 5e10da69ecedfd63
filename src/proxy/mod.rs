//! SOCKS5 Proxy Module
//!
//! Proxy endpoint description and the client side of the SOCKS5 handshake.

pub mod handshake;

pub use handshake::{connect, negotiate, BoundAddr};

use crate::error::{Result, TransportError};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Username/password for RFC 1929 authentication
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A SOCKS5 proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub address: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

impl ProxyTarget {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            credentials: None,
        }
    }

    /// Attach username/password credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// `host:port` of the proxy itself
    pub fn authority(&self) -> String {
        match self.address.parse::<Ipv6Addr>() {
            Ok(_) => format!("[{}]:{}", self.address, self.port),
            Err(_) => format!("{}:{}", self.address, self.port),
        }
    }

    /// `socks5h://` URL so host names are resolved by the proxy
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("socks5h://{}", self.authority()))
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", self.authority(), e)))?;

        if let Some(creds) = &self.credentials {
            url.set_username(&creds.username)
                .and_then(|_| url.set_password(Some(&creds.password)))
                .map_err(|_| {
                    TransportError::InvalidUrl(format!(
                        "cannot attach credentials to {}",
                        self.authority()
                    ))
                })?;
        }

        Ok(url)
    }
}

/// Destination of a CONNECT request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    Ip(IpAddr, u16),
    Domain(String, u16),
}

impl TargetAddr {
    /// Destination host and port of an HTTP(S) URL
    pub fn from_url(url: &Url) -> Result<Self> {
        let port = url
            .port_or_known_default()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{}: unknown port", url)))?;

        match url.host() {
            Some(Host::Domain(domain)) => Ok(TargetAddr::Domain(domain.to_string(), port)),
            Some(Host::Ipv4(ip)) => Ok(TargetAddr::Ip(IpAddr::V4(ip), port)),
            Some(Host::Ipv6(ip)) => Ok(TargetAddr::Ip(IpAddr::V6(ip), port)),
            None => Err(TransportError::InvalidUrl(format!("{}: missing host", url)).into()),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(_, port) | TargetAddr::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(IpAddr::V6(ip), port) => write!(f, "[{}]:{}", ip, port),
            TargetAddr::Ip(ip, port) => write!(f, "{}:{}", ip, port),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<(Ipv4Addr, u16)> for TargetAddr {
    fn from((ip, port): (Ipv4Addr, u16)) -> Self {
        TargetAddr::Ip(IpAddr::V4(ip), port)
    }
}
