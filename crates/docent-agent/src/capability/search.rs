//! Internet search backends

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{SearchHit, WebSearch};
use crate::error::{Error, Result};

const CSE_URL: &str = "https://www.googleapis.com/customsearch/v1";
/// The Custom Search API refuses `num` above ten
const CSE_MAX_RESULTS: usize = 10;

/// Google Custom Search JSON API client
#[derive(Clone)]
pub struct GoogleSearch {
    client: Client,
    api_key: String,
    engine_id: String,
    base_url: String,
}

impl GoogleSearch {
    pub fn new(api_key: impl Into<String>, engine_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            engine_id: engine_id.into(),
            base_url: CSE_URL.to_string(),
        }
    }

    /// Read `GOOGLE_SEARCH_API_KEY` and `GOOGLE_SEARCH_ENGINE_ID`
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("GOOGLE_SEARCH_API_KEY").ok()?;
        let engine = std::env::var("GOOGLE_SEARCH_ENGINE_ID").ok()?;
        Some(Self::new(key, engine))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl WebSearch for GoogleSearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let num = k.clamp(1, CSE_MAX_RESULTS).to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::capability(format!("Google search request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::capability("Google search rate limited (429)"));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::capability(format!(
                "Google search returned {status}: {body}"
            )));
        }

        let body: CseResponse = response
            .json()
            .await
            .map_err(|e| Error::capability(format!("Google search response: {e}")))?;
        Ok(body.into_hits(k))
    }
}

#[derive(Debug, Deserialize)]
struct CseResponse {
    #[serde(default)]
    items: Vec<CseItem>,
}

#[derive(Debug, Deserialize)]
struct CseItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

impl CseResponse {
    fn into_hits(self, k: usize) -> Vec<SearchHit> {
        self.items
            .into_iter()
            .take(k)
            .map(|item| SearchHit {
                title: item.title,
                link: item.link,
                snippet: item.snippet,
            })
            .collect()
    }
}

/// Stand-in used when no search credentials are configured
#[derive(Debug, Default, Clone)]
pub struct DisabledSearch;

#[async_trait]
impl WebSearch for DisabledSearch {
    async fn search(&self, query: &str, _k: usize) -> Result<Vec<SearchHit>> {
        Ok(vec![SearchHit {
            title: "Internet search is not configured".to_string(),
            link: String::new(),
            snippet: format!(
                "Set GOOGLE_SEARCH_API_KEY and GOOGLE_SEARCH_ENGINE_ID to search the web for \"{query}\"."
            ),
        }])
    }
}
