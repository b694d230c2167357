//! reqwest-backed catalog source.
//!
//! Status classification lives in [`check_response`] so the retry loop only
//! has to ask [`FetchError::is_transient`].

use async_trait::async_trait;
use kiln_config::CatalogConfig;
use kiln_core::EntityType;
use serde_json::Value;

use crate::error::FetchError;
use crate::source::CatalogSource;

/// Upstream JSON API keyed by `{base_url}/{collection}/{id}`.
pub struct HttpCatalog {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCatalog {
    /// Build a client from catalog configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the underlying `reqwest::Client`
    /// fails to build.
    pub fn new(config: &CatalogConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn record_url(&self, entity_type: EntityType, external_id: u64) -> String {
        format!(
            "{}/{}/{external_id}",
            self.base_url,
            entity_type.upstream_path()
        )
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn fetch_raw(
        &self,
        entity_type: EntityType,
        external_id: u64,
    ) -> Result<Value, FetchError> {
        let url = self.record_url(entity_type, external_id);
        tracing::debug!(%url, "GET catalog record");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        let resp = check_response(resp, entity_type, external_id).await?;

        let body: Value = resp.json().await.map_err(|e| {
            if e.is_decode() {
                FetchError::Parse(e.to_string())
            } else {
                FetchError::Transient(e.to_string())
            }
        })?;
        if body.is_null() {
            return Err(FetchError::NotFound {
                entity_type,
                external_id,
            });
        }
        Ok(body)
    }
}

/// Check an HTTP response for error conditions.
///
/// - **404** → [`FetchError::NotFound`] (terminal)
/// - **429** → [`FetchError::RateLimited`] with `Retry-After` parsing
/// - **5xx** → [`FetchError::Transient`]
/// - **other non-success** → [`FetchError::Api`] with the body
pub async fn check_response(
    resp: reqwest::Response,
    entity_type: EntityType,
    external_id: u64,
) -> Result<reqwest::Response, FetchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(FetchError::NotFound {
            entity_type,
            external_id,
        });
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited {
            retry_after_secs: parse_retry_after(&resp),
        });
    }
    if status.is_server_error() {
        return Err(FetchError::Transient(format!("upstream returned {status}")));
    }
    Err(FetchError::Api {
        status: status.as_u16(),
        message: resp.text().await.unwrap_or_default(),
    })
}

/// Parse the `Retry-After` header as seconds, falling back to 1 s.
fn parse_retry_after(resp: &reqwest::Response) -> u64 {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(1)
}
