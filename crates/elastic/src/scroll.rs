//! Scroll cursor over one source index.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use serde_json::value::RawValue;
use tracing::{debug, warn};

use esrollup_core::{SourceDocument, SourceError};
use esrollup_pipeline::IndexCursor;

use crate::client::ElasticClient;

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_type", default)]
    doc_type: Option<String>,
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: Option<Box<RawValue>>,
}

impl From<Hit> for SourceDocument {
    fn from(hit: Hit) -> Self {
        let source = match hit.source {
            Some(raw) => Bytes::from(raw.get().to_owned()),
            None => Bytes::from_static(b"{}"),
        };
        SourceDocument {
            index: hit.index,
            doc_type: hit.doc_type.unwrap_or_default(),
            id: hit.id,
            source,
        }
    }
}

/// Pages through an index with the scroll API, sorted by `_doc`.
///
/// The first page opens the scroll context; it is cleared once the index is
/// exhausted or the cursor is closed.
pub struct ElasticCursor {
    client: ElasticClient,
    index: String,
    page_size: usize,
    scroll_id: Option<String>,
    started: bool,
    exhausted: bool,
}

impl ElasticCursor {
    pub fn new(client: ElasticClient, index: impl Into<String>, page_size: usize) -> Self {
        Self {
            client,
            index: index.into(),
            page_size: page_size.max(1),
            scroll_id: None,
            started: false,
            exhausted: false,
        }
    }

    async fn first_page(&self) -> Result<SearchResponse, SourceError> {
        let mut url = self.client.endpoint(&[self.index.as_str(), "_search"]);
        url.query_pairs_mut()
            .append_pair("scroll", self.client.scroll_keepalive());
        let body = json!({ "size": self.page_size, "sort": ["_doc"] });

        let request = self.client.request(Method::POST, url.clone()).json(&body);
        let response = self.client.send_source(request, &url).await?;
        ElasticClient::decode(response, &url).await
    }

    async fn next_scroll(&self, scroll_id: &str) -> Result<SearchResponse, SourceError> {
        let url = self.client.endpoint(&["_search", "scroll"]);
        let body = json!({
            "scroll": self.client.scroll_keepalive(),
            "scroll_id": scroll_id,
        });

        let request = self.client.request(Method::POST, url.clone()).json(&body);
        match self.client.send_source(request, &url).await {
            Ok(response) => ElasticClient::decode(response, &url).await,
            Err(SourceError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(SourceError::ScrollExpired {
                    index: self.index.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn clear_scroll(&mut self) {
        let Some(scroll_id) = self.scroll_id.take() else {
            return;
        };
        let url = self.client.endpoint(&["_search", "scroll"]);
        let body = json!({ "scroll_id": [scroll_id] });
        let request = self.client.request(Method::DELETE, url.clone()).json(&body);

        match self.client.send_source(request, &url).await {
            Ok(_) => debug!(index = %self.index, "scroll cleared"),
            Err(e) => warn!(index = %self.index, error = %e, "failed to clear scroll"),
        }
    }
}

#[async_trait]
impl IndexCursor for ElasticCursor {
    async fn next_page(&mut self) -> Result<Option<Vec<SourceDocument>>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        let response = match (&self.scroll_id, self.started) {
            (_, false) => self.first_page().await?,
            (Some(id), true) => self.next_scroll(id).await?,
            (None, true) => {
                return Err(SourceError::Malformed {
                    url: self.client.endpoint(&[self.index.as_str(), "_search"]).to_string(),
                    reason: "search response carried no scroll id".to_string(),
                })
            }
        };
        self.started = true;
        if response.scroll_id.is_some() {
            self.scroll_id = response.scroll_id;
        }

        if response.hits.hits.is_empty() {
            self.exhausted = true;
            self.clear_scroll().await;
            return Ok(None);
        }

        Ok(Some(
            response.hits.hits.into_iter().map(SourceDocument::from).collect(),
        ))
    }

    async fn close(&mut self) {
        self.exhausted = true;
        self.clear_scroll().await;
    }
}
