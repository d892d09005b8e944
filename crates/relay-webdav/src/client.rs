use futures_util::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder};

use crate::config::WebDavConfig;
use crate::dir_cache::CollectionCreator;
use crate::error::TransferError;

/// Thin reqwest wrapper that knows the share's base URL and credentials.
#[derive(Clone)]
pub struct WebDavClient {
    http: Client,
    config: WebDavConfig,
}

impl WebDavClient {
    pub fn new(config: WebDavConfig) -> Result<Self, TransferError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransferError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &WebDavConfig {
        &self.config
    }

    /// Absolute URL for an encoded relative path.
    pub fn url_for(&self, encoded_path: &str) -> String {
        format!("{}/{}", self.config.base(), encoded_path.trim_start_matches('/'))
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        if self.config.username.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.config.username, Some(&self.config.password))
        }
    }

    /// MKCOL on one collection, returning the raw status.
    pub async fn mkcol(&self, encoded_path: &str) -> Result<u16, TransferError> {
        if !self.config.is_configured() {
            return Err(TransferError::Configuration("WebDAV URL is not configured".into()));
        }
        let method = Method::from_bytes(b"MKCOL")
            .map_err(|e| TransferError::Configuration(e.to_string()))?;
        let url = self.url_for(encoded_path);
        let resp = self
            .request(method, &url)
            .send()
            .await
            .map_err(TransferError::from_reqwest)?;
        Ok(resp.status().as_u16())
    }
}

impl CollectionCreator for WebDavClient {
    fn create_collection<'a>(&'a self, encoded_path: &'a str) -> BoxFuture<'a, Result<u16, TransferError>> {
        Box::pin(self.mkcol(encoded_path))
    }
}
