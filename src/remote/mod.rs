use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::NetworkError;

pub mod model;

pub use model::{ArticleDetail, ArticleSummary, RemoteArticle};

/// Remote source of article summaries and details.
#[async_trait]
pub trait ArticlesApi: Send + Sync {
    async fn fetch_article_list(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ArticleSummary>, NetworkError>;

    async fn fetch_article_detail(&self, id: &str) -> Result<ArticleDetail, NetworkError>;
}

#[derive(Clone)]
pub struct HttpArticlesApi {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpArticlesApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpArticlesApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpArticlesApi {
    pub fn from_config(cfg: &Config) -> Result<Self, NetworkError> {
        let base_url =
            Url::parse(&cfg.remote.base_url).map_err(|_| NetworkError::InvalidRequest)?;
        Self::with_base_url(
            base_url,
            Duration::from_secs(cfg.remote.timeout_seconds),
            &cfg.remote.user_agent,
        )
    }

    pub fn with_base_url(
        base_url: Url,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, NetworkError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { http, base_url })
    }

    pub fn list_url(&self, page: u32, per_page: u32) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string());
        url
    }

    pub fn detail_url(&self, id: &str) -> Result<Url, NetworkError> {
        if id.trim().is_empty() {
            return Err(NetworkError::InvalidRequest);
        }
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| NetworkError::InvalidRequest)?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, NetworkError> {
        debug!(%url, "sending article request");
        let res = self.http.get(url.clone()).send().await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%url, %status, body = %body, "article API returned an error status");
            return Err(NetworkError::HttpStatus(status.as_u16()));
        }

        let bytes = res.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            warn!(%url, ?err, "article API payload did not decode");
            NetworkError::Decoding(err.to_string())
        })
    }
}

#[async_trait]
impl ArticlesApi for HttpArticlesApi {
    async fn fetch_article_list(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ArticleSummary>, NetworkError> {
        if page == 0 || per_page == 0 {
            return Err(NetworkError::InvalidRequest);
        }
        self.get_json(self.list_url(page, per_page)).await
    }

    async fn fetch_article_detail(&self, id: &str) -> Result<ArticleDetail, NetworkError> {
        let url = self.detail_url(id)?;
        self.get_json(url).await
    }
}
