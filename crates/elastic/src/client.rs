//! HTTP client for one Elasticsearch cluster.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use esrollup_core::{ElasticConfig, SourceError};
use esrollup_pipeline::{IndexCursor, ScrollSource};

use crate::error::ElasticError;
use crate::scroll::ElasticCursor;

/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ElasticClient {
    http: reqwest::Client,
    base: Url,
    username: Option<String>,
    password: Option<String>,
    scroll_keepalive: String,
}

#[derive(Deserialize)]
struct CatIndex {
    index: String,
}

impl ElasticClient {
    pub fn new(host: &str, config: &ElasticConfig) -> Result<Self, ElasticError> {
        let base = Url::parse(host).map_err(|e| ElasticError::InvalidUrl {
            url: host.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(ElasticError::InvalidUrl {
                url: host.to_string(),
                reason: "expected an http(s) base url".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        info!(host = %base, timeout_secs = config.request_timeout_secs, "elasticsearch client ready");

        Ok(Self {
            http,
            base,
            username: config.username.clone(),
            password: config.password.clone(),
            scroll_keepalive: config.scroll_keepalive.clone(),
        })
    }

    pub fn scroll_keepalive(&self) -> &str {
        &self.scroll_keepalive
    }

    /// Base url with `segments` appended as escaped path segments.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Request builder with credentials applied.
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    /// Send a source-side request, mapping failures and non-2xx statuses.
    pub(crate) async fn send_source(
        &self,
        request: RequestBuilder,
        url: &Url,
    ) -> Result<Response, SourceError> {
        let response = request.send().await.map_err(|e| SourceError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    pub(crate) async fn decode<T: DeserializeOwned>(
        response: Response,
        url: &Url,
    ) -> Result<T, SourceError> {
        let body = response.bytes().await.map_err(|e| SourceError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| SourceError::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ScrollSource for ElasticClient {
    async fn index_names(&self) -> Result<Vec<String>, SourceError> {
        let mut url = self.endpoint(&["_cat", "indices"]);
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("h", "index");

        let response = self
            .send_source(self.request(Method::GET, url.clone()), &url)
            .await?;
        let indexes: Vec<CatIndex> = Self::decode(response, &url).await?;
        debug!(count = indexes.len(), "listed indexes");
        Ok(indexes.into_iter().map(|i| i.index).collect())
    }

    async fn open_cursor(
        &self,
        index: &str,
        page_size: usize,
    ) -> Result<Box<dyn IndexCursor>, SourceError> {
        Ok(Box::new(ElasticCursor::new(self.clone(), index, page_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(host: &str) -> ElasticClient {
        ElasticClient::new(host, &ElasticConfig::default()).unwrap()
    }

    #[test]
    fn test_endpoint_appends_segments() {
        let c = client("http://localhost:9200");
        assert_eq!(
            c.endpoint(&["logs-2016.01.02", "_search"]).as_str(),
            "http://localhost:9200/logs-2016.01.02/_search"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let c = client("https://proxy.example.com/es/");
        assert_eq!(
            c.endpoint(&["_bulk"]).as_str(),
            "https://proxy.example.com/es/_bulk"
        );
    }

    #[test]
    fn test_endpoint_escapes_index_names() {
        let c = client("http://localhost:9200");
        assert_eq!(
            c.endpoint(&["a b", "_search"]).as_str(),
            "http://localhost:9200/a%20b/_search"
        );
    }

    #[test]
    fn test_rejects_non_http_host() {
        assert!(matches!(
            ElasticClient::new("localhost:9200", &ElasticConfig::default()),
            Err(ElasticError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ElasticClient::new("not a url", &ElasticConfig::default()),
            Err(ElasticError::InvalidUrl { .. })
        ));
    }
}
