//! netdriver - swappable async HTTP transport drivers
//!
//! A [`Driver`] fetches JSON, text and binary resources and posts forms while
//! following redirects. Two implementations share one contract:
//!
//! - [`HttpDriver`] talks to the target directly over a pooled session.
//! - [`Socks5Driver`] tunnels every connection through a SOCKS5 proxy,
//!   optionally with username/password authentication.
//!
//! Any driver can be wrapped in [`RateLimited`], which admits at most K calls
//! per period and delays (never rejects) the rest.
//!
//! ```no_run
//! use netdriver::{Driver, HttpDriver, Params, RateLimited};
//! use std::time::Duration;
//!
//! # async fn run() -> netdriver::Result<()> {
//! let driver = RateLimited::new(HttpDriver::new()?, 3, Duration::from_secs(1));
//! let json = driver
//!     .fetch_json("https://example.com/data.json", &Params::new())
//!     .await?;
//! println!("{:?}", json.get("name"));
//! driver.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod limiter;
pub mod proxy;

pub use config::{ConfigLoader, DriverConfig, ProxySettings, RateLimitSettings, SessionSettings};
pub use driver::{
    params, Driver, HttpDriver, JsonMap, Params, PostResponse, Socks5Driver, TextResponse,
};
pub use error::{DecodeError, DriverError, ProxyError, Result, TransportError};
pub use limiter::{RateLimited, RateWindow, WindowPolicy};
pub use proxy::{Credentials, ProxyTarget, TargetAddr};

use std::sync::Arc;

/// Build the driver stack described by the default configuration sources.
///
/// Reads `.env`, the default config files and the `NETDRIVER_*` environment
/// variables; see [`ConfigLoader::new`].
pub fn from_env() -> Result<Arc<dyn Driver>> {
    ConfigLoader::new()?.into_config()?.build()
}
