//! HTTP Session
//!
//! Pooled reqwest client shared by both drivers, with a close signal that
//! cancels requests still in flight.

use crate::driver::{JsonMap, Params, PostResponse, TextResponse};
use crate::error::{DecodeError, DriverError, ProxyError, Result, TransportError};
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{Client, Response, Url};
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Pooled HTTP session
pub(crate) struct Session {
    /// `None` once closed; dropping the client releases the pool
    client: RwLock<Option<Client>>,

    /// Flips to `true` on close
    closed: watch::Sender<bool>,

    /// Connect failures are reported as proxy failures when set
    via_proxy: bool,
}

impl Session {
    pub(crate) fn new(client: Client, via_proxy: bool) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            client: RwLock::new(Some(client)),
            closed,
            via_proxy,
        }
    }

    fn client(&self) -> Result<Client> {
        self.client
            .read()
            .as_ref()
            .cloned()
            .ok_or(DriverError::Transport(TransportError::Closed))
    }

    pub(crate) fn close(&self) {
        if self.client.write().take().is_some() {
            debug!(via_proxy = self.via_proxy, "closing HTTP session");
        }
        self.closed.send_replace(true);
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) async fn closed(&self) {
        wait_closed(self.closed.subscribe()).await
    }

    /// Run `fut` unless the session closes first
    pub(crate) async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let rx = self.closed.subscribe();
        if *rx.borrow() {
            return Err(TransportError::Closed.into());
        }

        tokio::select! {
            biased;
            _ = wait_closed(rx) => Err(TransportError::Closed.into()),
            result = fut => result,
        }
    }

    fn map_err(&self, err: reqwest::Error) -> DriverError {
        if self.via_proxy && err.is_connect() {
            ProxyError::Tunnel(err.to_string()).into()
        } else {
            err.into()
        }
    }

    async fn get(&self, url: &str, params: &Params) -> Result<Response> {
        let client = self.client()?;
        trace!(url, "GET");
        client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn body(&self, response: Response) -> Result<Bytes> {
        response.bytes().await.map_err(|e| self.map_err(e))
    }

    pub(crate) async fn fetch_json(&self, url: &str, params: &Params) -> Result<JsonMap> {
        self.run(async {
            let response = self.get(url, params).await?;
            let body = self.body(response).await?;
            decode_object(&body)
        })
        .await
    }

    pub(crate) async fn fetch_text(&self, url: &str, params: &Params) -> Result<TextResponse> {
        self.run(async {
            let response = self.get(url, params).await?;
            let status = response.status();
            let body = self.body(response).await?;
            Ok(TextResponse {
                status,
                text: decode_text(body)?,
            })
        })
        .await
    }

    pub(crate) async fn fetch_binary(&self, url: &str, params: &Params) -> Result<Bytes> {
        self.run(async {
            let response = self.get(url, params).await?;
            self.body(response).await
        })
        .await
    }

    pub(crate) async fn post_text(&self, url: &str, data: &Params) -> Result<PostResponse> {
        self.run(async {
            let client = self.client()?;
            trace!(url, "POST");
            let response = client
                .post(url)
                .form(data)
                .send()
                .await
                .map_err(|e| self.map_err(e))?;

            // keep the caller's spelling unless the request actually moved
            let final_url = match Url::parse(url) {
                Ok(submitted) if submitted == *response.url() => url.to_string(),
                _ => {
                    let redirected = response.url().to_string();
                    debug!(from = url, to = %redirected, "POST was redirected");
                    redirected
                }
            };

            let body = self.body(response).await?;
            Ok(PostResponse {
                url: final_url,
                text: decode_text(body)?,
            })
        })
        .await
    }
}

async fn wait_closed(mut rx: watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed {
            return;
        }
        // Sender gone means the session was dropped
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Decode a body as a JSON object
pub(crate) fn decode_object(body: &[u8]) -> Result<JsonMap> {
    match serde_json::from_slice::<serde_json::Value>(body)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(DecodeError::NotAnObject(json_kind(&other)).into()),
    }
}

/// Decode a body as UTF-8 without replacing invalid sequences
pub(crate) fn decode_text(body: Bytes) -> Result<String> {
    String::from_utf8(body.to_vec()).map_err(|e| DecodeError::Utf8(e).into())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
