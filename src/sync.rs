use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::db::ArticleStore;
use crate::error::NetworkError;
use crate::live::LiveQuery;
use crate::model::{Article, ArticleFilter, UNKNOWN_PUBLISHED_AT};
use crate::remote::{ArticlesApi, RemoteArticle};

/// What view-states need from the data layer.
#[async_trait]
pub trait ArticlesRepository: Send + Sync {
    fn observe_list(&self, filter: ArticleFilter) -> LiveQuery<Vec<Article>>;

    fn observe_detail(&self, id: &str) -> LiveQuery<Option<Article>>;

    /// Fetch one page into the cache and return how many records it held,
    /// counting records that were dropped for lacking an id.
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<usize>;

    async fn fetch_detail(&self, id: &str) -> Result<()>;
}

/// Pulls from the remote source and writes into the local store.
///
/// Stateless apart from its two collaborators: pagination progress belongs
/// to the caller, and remote failures are returned as-is (no retries).
#[derive(Clone)]
pub struct SyncCoordinator {
    api: Arc<dyn ArticlesApi>,
    store: Arc<dyn ArticleStore>,
}

impl SyncCoordinator {
    pub fn new(api: Arc<dyn ArticlesApi>, store: Arc<dyn ArticleStore>) -> Self {
        Self { api, store }
    }
}

#[async_trait]
impl ArticlesRepository for SyncCoordinator {
    fn observe_list(&self, filter: ArticleFilter) -> LiveQuery<Vec<Article>> {
        self.store.observe_list(filter)
    }

    fn observe_detail(&self, id: &str) -> LiveQuery<Option<Article>> {
        self.store.observe_detail(id)
    }

    #[instrument(skip(self))]
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<usize> {
        let records = self.api.fetch_article_list(page, per_page).await?;
        let fetched = records.len();
        let articles: Vec<Article> = records
            .into_iter()
            .filter(RemoteArticle::has_id)
            .map(article_from_remote)
            .collect();
        let skipped = fetched - articles.len();
        if skipped > 0 {
            warn!(skipped, "dropping records without an id");
        }
        self.store.upsert_list(&articles).await?;
        info!(count = articles.len(), "page stored");
        Ok(fetched)
    }

    #[instrument(skip(self))]
    async fn fetch_detail(&self, id: &str) -> Result<()> {
        let record = self.api.fetch_article_detail(id).await?;
        if !record.has_id() {
            warn!("detail record has no id, not storing it");
            return Err(NetworkError::Decoding("article detail without an id".into()).into());
        }
        let article = article_from_remote(record);
        self.store.upsert_detail(&article).await?;
        info!(has_content = article.has_content(), "detail stored");
        Ok(())
    }
}

pub fn article_from_remote(record: RemoteArticle) -> Article {
    let content = record.preferred_content();
    Article {
        id: record.id.to_string(),
        title: record.title,
        summary: record.summary,
        author: record.author_name,
        published_at: record.published_at.unwrap_or(UNKNOWN_PUBLISHED_AT),
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn maps_remote_record() {
        let published = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let article = article_from_remote(RemoteArticle {
            id: 42,
            title: "T".into(),
            summary: "S".into(),
            published_at: Some(published),
            author_name: "A".into(),
            body_markdown: None,
            body_html: Some("<p>h</p>".into()),
        });
        assert_eq!(article.id, "42");
        assert_eq!(article.author, "A");
        assert_eq!(article.published_at, published);
        assert_eq!(article.content, "<p>h</p>");
    }

    #[test]
    fn zero_id_is_not_an_id() {
        assert!(!RemoteArticle::default().has_id());
        assert!(RemoteArticle { id: 7, ..Default::default() }.has_id());
    }

    #[test]
    fn missing_date_maps_to_sentinel() {
        let article = article_from_remote(RemoteArticle::default());
        assert_eq!(article.published_at, UNKNOWN_PUBLISHED_AT);
        assert_eq!(article.content, "");
    }
}
