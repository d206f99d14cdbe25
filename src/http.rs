//! HTTP connector pinned to one local address

use crate::config::HttpConfig;
use crate::error::PortalError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    local: Ipv4Addr,
}

impl HttpClient {
    /// Every connection made by this client originates from `local`, so the
    /// portal sees it as its own session.
    pub fn new(local: Ipv4Addr, cfg: &HttpConfig) -> Result<Self, PortalError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) Chrome/120.0"),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );

        let client = Client::builder()
            .local_address(IpAddr::V4(local))
            .timeout(Duration::from_secs(cfg.timeout))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout))
            .default_headers(headers)
            .no_proxy()
            .build()?;

        Ok(Self {
            inner: client,
            local,
        })
    }

    /// POST a JSON body and return the response text, decoded with the
    /// charset the server declared.
    pub async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<String, PortalError> {
        let resp = self
            .inner
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::debug!("{} from {} via {}", status, url, self.local);
            return Err(PortalError::HttpStatus {
                status,
                body: text.chars().take(50).collect(),
            });
        }

        Ok(resp.text().await?)
    }
}
