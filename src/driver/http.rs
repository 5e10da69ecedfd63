//! Direct HTTP Driver
//!
//! Talks to the target over a plain pooled connection.

use crate::config::SessionSettings;
use crate::driver::session::Session;
use crate::driver::{Driver, JsonMap, Params, PostResponse, TextResponse};
use crate::error::{DriverError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

/// Driver without a proxy
pub struct HttpDriver {
    session: Session,
}

impl HttpDriver {
    /// Create a driver with default session settings
    pub fn new() -> Result<Self> {
        Self::from_settings(&SessionSettings::default())
    }

    /// Create a driver from session settings
    pub fn from_settings(settings: &SessionSettings) -> Result<Self> {
        let client = settings
            .client_builder()
            .build()
            .map_err(|e| DriverError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client))
    }

    /// Wrap an already configured client
    pub fn with_client(client: Client) -> Self {
        Self {
            session: Session::new(client, false),
        }
    }
}

#[async_trait]
impl Driver for HttpDriver {
    async fn fetch_json(&self, url: &str, params: &Params) -> Result<JsonMap> {
        self.session.fetch_json(url, params).await
    }

    async fn fetch_text(&self, url: &str, params: &Params) -> Result<TextResponse> {
        self.session.fetch_text(url, params).await
    }

    async fn fetch_binary(&self, url: &str, params: &Params) -> Result<Bytes> {
        self.session.fetch_binary(url, params).await
    }

    async fn post_text(&self, url: &str, data: &Params) -> Result<PostResponse> {
        self.session.post_text(url, data).await
    }

    fn close(&self) {
        self.session.close()
    }

    fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    async fn closed(&self) {
        self.session.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::params;
    use crate::error::{DecodeError, TransportError};
    use mockito::Matcher;
    use std::sync::Arc;
    use std::time::Duration;

    const TESTDATA: &str = "{\n    \"name\": \"netdriver\",\n    \"tags\": [\"http\", \"socks5\"],\n    \"nested\": {\"answer\": 42, \"pi\": 3.14, \"none\": null}\n}\n";

    #[tokio::test]
    async fn test_client_creation() {
        let driver = HttpDriver::new();
        assert!(driver.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/testdata.json")
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body(TESTDATA)
            .create_async()
            .await;

        let driver = HttpDriver::new().unwrap();
        let url = format!("{}/testdata.json", server.url());
        let json = driver.fetch_json(&url, &Params::new()).await.unwrap();
        driver.close();

        let expected: JsonMap = serde_json::from_str(TESTDATA).unwrap();
        assert_eq!(json, expected);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_json_sends_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/method/users.get")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("user_ids".into(), "1".into()),
                Matcher::UrlEncoded("v".into(), "5.131".into()),
            ]))
            .with_body(r#"{"response": []}"#)
            .create_async()
            .await;

        let driver = HttpDriver::new().unwrap();
        let url = format!("{}/method/users.get", server.url());
        let json = driver
            .fetch_json(&url, &params([("user_ids", "1"), ("v", "5.131")]))
            .await
            .unwrap();

        assert_eq!(json["response"], serde_json::json!([]));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_json_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/broken")
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let driver = HttpDriver::new().unwrap();
        let url = format!("{}/broken", server.url());
        let err = driver.fetch_json(&url, &Params::new()).await.unwrap_err();
        assert!(matches!(err, DriverError::Decode(DecodeError::Json(_))));

        // the driver stays usable after a failed call
        let text = driver.fetch_text(&url, &Params::new()).await.unwrap();
        assert_eq!(text.text, "<html>not json</html>");
    }

    #[tokio::test]
    async fn test_text_and_binary_agree() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/testdata.json")
            .with_body(TESTDATA)
            .expect(2)
            .create_async()
            .await;

        let driver = HttpDriver::new().unwrap();
        let url = format!("{}/testdata.json", server.url());
        let text = driver.fetch_text(&url, &Params::new()).await.unwrap();
        let bytes = driver.fetch_binary(&url, &Params::new()).await.unwrap();

        assert_eq!(text.status, reqwest::StatusCode::OK);
        assert_eq!(text.text, TESTDATA);
        assert_eq!(text.text.as_bytes(), &bytes[..]);
    }

    #[tokio::test]
    async fn test_fetch_text_reports_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("Not Found")
            .create_async()
            .await;

        let driver = HttpDriver::new().unwrap();
        let url = format!("{}/missing", server.url());
        let text = driver.fetch_text(&url, &Params::new()).await.unwrap();

        assert_eq!(text.status, reqwest::StatusCode::NOT_FOUND);
        assert_eq!(text.text, "Not Found");
    }

    #[tokio::test]
    async fn test_fetch_binary_is_untouched() {
        let payload: Vec<u8> = vec![0x00, 0xff, 0x89, b'P', b'N', b'G', 0x0d, 0x0a];
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/image.png")
            .with_header("content-type", "image/png")
            .with_body(payload.clone())
            .create_async()
            .await;

        let driver = HttpDriver::new().unwrap();
        let url = format!("{}/image.png", server.url());
        let bytes = driver.fetch_binary(&url, &Params::new()).await.unwrap();
        assert_eq!(&bytes[..], &payload[..]);
    }

    #[tokio::test]
    async fn test_post_text_without_redirect() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/session")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("login".into(), "test".into()),
                Matcher::UrlEncoded("password".into(), "test".into()),
            ]))
            .with_body("Cookies must be enabled to use GitHub.")
            .create_async()
            .await;

        let driver = HttpDriver::new().unwrap();
        let url = format!("{}/session", server.url());
        let response = driver
            .post_text(&url, &params([("login", "test"), ("password", "test")]))
            .await
            .unwrap();
        driver.close();

        assert_eq!(response.url, url);
        assert_eq!(response.text, "Cookies must be enabled to use GitHub.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_text_keeps_submitted_url() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_body("ok")
            .create_async()
            .await;

        let driver = HttpDriver::new().unwrap();
        // no trailing slash, reqwest would report it normalized
        let url = server.url();
        let response = driver.post_text(&url, &params([("a", "b")])).await.unwrap();

        assert_eq!(response.url, url);
        assert_eq!(response.text, "ok");
    }

    #[tokio::test]
    async fn test_post_text_follows_redirect() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(302)
            .with_header("location", "/blank.html")
            .create_async()
            .await;
        server
            .mock("GET", "/blank.html")
            .with_body("welcome")
            .create_async()
            .await;

        let driver = HttpDriver::new().unwrap();
        let url = format!("{}/login", server.url());
        let response = driver
            .post_text(&url, &params([("login", "test")]))
            .await
            .unwrap();

        assert_eq!(response.url, format!("{}/blank.html", server.url()));
        assert_eq!(response.text, "welcome");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let driver = HttpDriver::new().unwrap();
        let err = driver
            .fetch_json(&format!("http://{}/", addr), &Params::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::Transport(TransportError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn test_close_twice_keeps_results() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/testdata.json")
            .with_body(TESTDATA)
            .create_async()
            .await;

        let driver = HttpDriver::new().unwrap();
        let url = format!("{}/testdata.json", server.url());
        let json = driver.fetch_json(&url, &Params::new()).await.unwrap();

        driver.close();
        driver.close();

        assert!(driver.is_closed());
        assert_eq!(json["name"], "netdriver");
        let err = driver.fetch_json(&url, &Params::new()).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_close_fails_in_flight_request() {
        // accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let driver = Arc::new(HttpDriver::new().unwrap());
        let closer = driver.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            closer.close();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            driver.fetch_text(&format!("http://{}/slow", addr), &Params::new()),
        )
        .await
        .expect("close must not leave the request hanging");
        assert!(result.unwrap_err().is_closed());
    }
}
