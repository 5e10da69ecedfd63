//! Driver Module
//!
//! The capability surface every transport implements, plus the direct and
//! SOCKS5-proxied implementations.

pub mod http;
pub(crate) mod session;
pub mod socks5;

pub use http::HttpDriver;
pub use socks5::Socks5Driver;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Query or form parameters, sent in key order
pub type Params = BTreeMap<String, String>;

/// A decoded JSON object body
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Result of [`Driver::fetch_text`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextResponse {
    /// HTTP status of the response; non-2xx is not an error
    pub status: StatusCode,

    /// Body decoded as UTF-8
    pub text: String,
}

/// Result of [`Driver::post_text`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostResponse {
    /// URL reached after following redirects
    pub url: String,

    /// Body at the final URL
    pub text: String,
}

/// Operations every transport supports.
///
/// Implementations are shared between concurrent callers, so every method
/// takes `&self`. Once [`close`](Driver::close) has been called, pending and
/// future requests fail with [`TransportError::Closed`](crate::TransportError::Closed).
#[async_trait]
pub trait Driver: Send + Sync {
    /// GET `url` with `params` as query string and decode the body as a JSON object
    async fn fetch_json(&self, url: &str, params: &Params) -> Result<JsonMap>;

    /// GET `url` and return the status with the body as text
    async fn fetch_text(&self, url: &str, params: &Params) -> Result<TextResponse>;

    /// GET `url` and return the body bytes untouched
    async fn fetch_binary(&self, url: &str, params: &Params) -> Result<Bytes>;

    /// POST `data` form-encoded, following redirects
    async fn post_text(&self, url: &str, data: &Params) -> Result<PostResponse>;

    /// Release pooled connections. Safe to call repeatedly.
    fn close(&self);

    /// Whether [`close`](Driver::close) has been called
    fn is_closed(&self) -> bool;

    /// Resolves once the driver is closed
    async fn closed(&self);
}

#[async_trait]
impl<D: Driver + ?Sized> Driver for Arc<D> {
    async fn fetch_json(&self, url: &str, params: &Params) -> Result<JsonMap> {
        (**self).fetch_json(url, params).await
    }

    async fn fetch_text(&self, url: &str, params: &Params) -> Result<TextResponse> {
        (**self).fetch_text(url, params).await
    }

    async fn fetch_binary(&self, url: &str, params: &Params) -> Result<Bytes> {
        (**self).fetch_binary(url, params).await
    }

    async fn post_text(&self, url: &str, data: &Params) -> Result<PostResponse> {
        (**self).post_text(url, data).await
    }

    fn close(&self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    async fn closed(&self) {
        (**self).closed().await
    }
}

#[async_trait]
impl<D: Driver + ?Sized> Driver for Box<D> {
    async fn fetch_json(&self, url: &str, params: &Params) -> Result<JsonMap> {
        (**self).fetch_json(url, params).await
    }

    async fn fetch_text(&self, url: &str, params: &Params) -> Result<TextResponse> {
        (**self).fetch_text(url, params).await
    }

    async fn fetch_binary(&self, url: &str, params: &Params) -> Result<Bytes> {
        (**self).fetch_binary(url, params).await
    }

    async fn post_text(&self, url: &str, data: &Params) -> Result<PostResponse> {
        (**self).post_text(url, data).await
    }

    fn close(&self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    async fn closed(&self) {
        (**self).closed().await
    }
}

/// Build [`Params`] from string pairs
pub fn params<K, V, I>(pairs: I) -> Params
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
