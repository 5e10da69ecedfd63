//! Driver Settings
//!
//! Serializable description of a driver stack: session tuning, an optional
//! SOCKS5 proxy and an optional rate limit.

use crate::driver::{Driver, HttpDriver, Socks5Driver};
use crate::error::{DriverError, Result};
use crate::limiter::{RateLimited, WindowPolicy, DEFAULT_REQUESTS_PER_PERIOD};
use crate::proxy::{Credentials, ProxyTarget};
use reqwest::redirect::Policy;
use reqwest::ClientBuilder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// HTTP session settings shared by every driver kind
    pub session: SessionSettings,

    /// Tunnel through this SOCKS5 proxy when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySettings>,

    /// Wrap the driver in a rate-limiting overlay when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSettings>,
}

/// HTTP session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Whole-request timeout
    pub timeout_secs: u64,

    pub connect_timeout_secs: u64,

    /// Idle pooled connections kept per host
    pub pool_max_idle_per_host: usize,

    /// Redirects followed before giving up
    pub max_redirects: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 10,
            max_redirects: 10,
            user_agent: None,
        }
    }
}

impl SessionSettings {
    /// A reqwest builder carrying these settings
    pub fn client_builder(&self) -> ClientBuilder {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .redirect(Policy::limited(self.max_redirects));

        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        builder
    }
}

/// SOCKS5 proxy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub address: String,

    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Probe each new destination with an explicit handshake. The probe opens
    /// one extra tunnel to the destination and closes it without sending data.
    #[serde(default = "default_true")]
    pub verify_tunnel: bool,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_handshake_timeout() -> u64 {
    10
}

impl ProxySettings {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            username: None,
            password: None,
            verify_tunnel: true,
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }

    /// Proxy endpoint with credentials when both halves are present
    pub fn target(&self) -> ProxyTarget {
        let target = ProxyTarget::new(self.address.clone(), self.port);
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => target.with_credentials(Credentials::new(user, pass)),
            _ => target,
        }
    }
}

/// Rate limit settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Maximum admissions per period
    pub requests_per_period: u32,

    /// Period length in seconds; fractions allowed
    pub period_secs: f64,

    pub policy: WindowPolicy,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_period: DEFAULT_REQUESTS_PER_PERIOD,
            period_secs: 1.0,
            policy: WindowPolicy::default(),
        }
    }
}

impl RateLimitSettings {
    /// Configured period; values too large for a `Duration` saturate
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(self.period_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

impl DriverConfig {
    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if let Some(proxy) = &self.proxy {
            if proxy.address.trim().is_empty() {
                return Err(DriverError::Config("proxy address is empty".to_string()));
            }
            if proxy.port == 0 {
                return Err(DriverError::Config("proxy port must not be 0".to_string()));
            }
            if proxy.username.is_some() != proxy.password.is_some() {
                return Err(DriverError::Config(
                    "proxy username and password must be set together".to_string(),
                ));
            }
        }

        if let Some(limit) = &self.rate_limit {
            if limit.requests_per_period == 0 {
                return Err(DriverError::Config(
                    "rate_limit.requests_per_period must be at least 1".to_string(),
                ));
            }
            if !limit.period_secs.is_finite() || limit.period_secs <= 0.0 {
                return Err(DriverError::Config(format!(
                    "rate_limit.period_secs must be a positive number, got {}",
                    limit.period_secs
                )));
            }
            if Duration::try_from_secs_f64(limit.period_secs).is_err() {
                return Err(DriverError::Config(format!(
                    "rate_limit.period_secs is out of range, got {}",
                    limit.period_secs
                )));
            }
        }

        Ok(())
    }

    /// Assemble the configured driver stack
    pub fn build(&self) -> Result<Arc<dyn Driver>> {
        self.validate()?;

        let driver: Arc<dyn Driver> = match &self.proxy {
            Some(proxy) => Arc::new(Socks5Driver::from_settings(proxy, &self.session)?),
            None => Arc::new(HttpDriver::from_settings(&self.session)?),
        };

        Ok(match &self.rate_limit {
            Some(limit) => Arc::new(RateLimited::from_settings(driver, limit)),
            None => driver,
        })
    }
}
