//! SOCKS5 Proxied Driver
//!
//! Same contract as [`HttpDriver`](crate::HttpDriver), with every connection
//! tunneled through a SOCKS5 proxy.

use crate::config::{ProxySettings, SessionSettings};
use crate::driver::session::Session;
use crate::driver::{Driver, JsonMap, Params, PostResponse, TextResponse};
use crate::error::{DriverError, Result, TransportError};
use crate::proxy::{self, Credentials, ProxyTarget, TargetAddr};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Proxy, Url};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Driver that tunnels through a SOCKS5 proxy
pub struct Socks5Driver {
    proxy: ProxyTarget,

    session: Session,

    /// Probe each new destination with an explicit handshake first. Each probe
    /// leaves one empty connection in the destination's logs.
    verify_tunnel: bool,

    handshake_timeout: Duration,

    /// Destinations whose tunnel has already been probed
    verified: Mutex<HashSet<TargetAddr>>,
}

impl Socks5Driver {
    /// Anonymous proxy at `address:port`
    pub fn new(address: impl Into<String>, port: u16) -> Result<Self> {
        Self::from_target(ProxyTarget::new(address, port), &SessionSettings::default())
    }

    /// Proxy at `address:port` requiring username/password authentication
    pub fn with_auth(
        address: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let target =
            ProxyTarget::new(address, port).with_credentials(Credentials::new(username, password));
        Self::from_target(target, &SessionSettings::default())
    }

    /// Create a driver from proxy and session settings
    pub fn from_settings(proxy: &ProxySettings, session: &SessionSettings) -> Result<Self> {
        let mut driver = Self::from_target(proxy.target(), session)?;
        driver.verify_tunnel = proxy.verify_tunnel;
        driver.handshake_timeout = Duration::from_secs(proxy.handshake_timeout_secs);
        Ok(driver)
    }

    fn from_target(proxy: ProxyTarget, settings: &SessionSettings) -> Result<Self> {
        let socks = Proxy::all(proxy.url()?).map_err(|e| {
            DriverError::Config(format!("Invalid proxy {}: {}", proxy.authority(), e))
        })?;

        let client = settings
            .client_builder()
            .proxy(socks)
            .build()
            .map_err(|e| DriverError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            proxy,
            session: Session::new(client, true),
            verify_tunnel: true,
            handshake_timeout: Duration::from_secs(settings.connect_timeout_secs),
            verified: Mutex::new(HashSet::new()),
        })
    }

    /// The proxy this driver tunnels through
    pub fn proxy(&self) -> &ProxyTarget {
        &self.proxy
    }

    /// Handshake with the proxy for the destination of `url` unless already done
    async fn ensure_tunnel(&self, url: &str) -> Result<()> {
        if !self.verify_tunnel {
            return Ok(());
        }

        let parsed =
            Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", url, e)))?;
        let target = TargetAddr::from_url(&parsed)?;
        if self.verified.lock().contains(&target) {
            return Ok(());
        }

        let stream = proxy::connect(&self.proxy, &target, self.handshake_timeout).await?;
        drop(stream);

        debug!(proxy = %self.proxy.authority(), %target, "destination reachable through proxy");
        self.verified.lock().insert(target);
        Ok(())
    }
}

#[async_trait]
impl Driver for Socks5Driver {
    async fn fetch_json(&self, url: &str, params: &Params) -> Result<JsonMap> {
        self.session.run(self.ensure_tunnel(url)).await?;
        self.session.fetch_json(url, params).await
    }

    async fn fetch_text(&self, url: &str, params: &Params) -> Result<TextResponse> {
        self.session.run(self.ensure_tunnel(url)).await?;
        self.session.fetch_text(url, params).await
    }

    async fn fetch_binary(&self, url: &str, params: &Params) -> Result<Bytes> {
        self.session.run(self.ensure_tunnel(url)).await?;
        self.session.fetch_binary(url, params).await
    }

    async fn post_text(&self, url: &str, data: &Params) -> Result<PostResponse> {
        self.session.run(self.ensure_tunnel(url)).await?;
        self.session.post_text(url, data).await
    }

    fn close(&self) {
        self.session.close();
        self.verified.lock().clear();
    }

    fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    async fn closed(&self) {
        self.session.closed().await
    }
}
