// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity provider metadata discovery
//!
//! Fetches the provider's `.well-known/openid-configuration` document. There
//! is no retry and no timeout here: the next event re-runs the reconciliation
//! pass, which fetches again.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{OpenidcError, Result};

/// Subset of the OpenID Provider metadata document this crate consumes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderMetadata {
    pub issuer: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub introspection_endpoint: Option<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

/// Source of provider metadata documents
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch and parse the document at `url`.
    ///
    /// Any failure is an [`OpenidcError::Configuration`].
    async fn fetch(&self, url: &str) -> Result<ProviderMetadata>;
}

/// [`MetadataSource`] backed by HTTP(S) GET requests
#[derive(Debug, Clone, Default)]
pub struct HttpMetadataFetcher {
    client: Client,
}

impl HttpMetadataFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, custom roots)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataFetcher {
    async fn fetch(&self, url: &str) -> Result<ProviderMetadata> {
        info!(url = %url, "GETing provider metadata");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| {
                OpenidcError::configuration(format!(
                    "failed to fetch provider metadata from {}: {}",
                    url, e
                ))
            })?;

        response.json::<ProviderMetadata>().await.map_err(|e| {
            OpenidcError::configuration(format!(
                "provider metadata at {} is not valid JSON: {}",
                url, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn fetcher() -> HttpMetadataFetcher {
        // loopback only; ignore any proxy set in the environment
        HttpMetadataFetcher::with_client(Client::builder().no_proxy().build().unwrap())
    }

    /// Serve one HTTP response on a loopback port and return the URL
    fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        });

        format!("http://{}/.well-known/openid-configuration", addr)
    }

    #[tokio::test]
    async fn test_fetch_parses_document() {
        let url = serve_once(
            "200 OK",
            r#"{
                "issuer": "https://idp.example.com",
                "authorization_endpoint": "https://idp.example.com/auth",
                "token_endpoint": "https://idp.example.com/token",
                "introspection_endpoint": "https://idp.example.com/introspect",
                "token_endpoint_auth_methods_supported": ["client_secret_basic"],
                "grant_types_supported": ["authorization_code"]
            }"#,
        );

        let metadata = fetcher().fetch(&url).await.unwrap();
        assert_eq!(metadata.issuer.as_deref(), Some("https://idp.example.com"));
        assert_eq!(
            metadata.introspection_endpoint.as_deref(),
            Some("https://idp.example.com/introspect")
        );
        assert_eq!(metadata.userinfo_endpoint, None);
        assert_eq!(
            metadata.token_endpoint_auth_methods_supported,
            vec!["client_secret_basic".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let url = serve_once("404 Not Found", "{}");
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_fetch_invalid_json() {
        let url = serve_once("200 OK", "<html>not json</html>");
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{}/", port);

        let err = fetcher().fetch(&url).await.unwrap_err();
        assert!(err.is_configuration());
    }
}
