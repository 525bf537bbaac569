use article_sync::db::{self, ArticleStore, SqliteArticleStore};
use article_sync::error::{network_error, user_message};
use article_sync::model::{ArticleFilter, UNKNOWN_PUBLISHED_AT};
use article_sync::remote::{ArticleDetail, ArticleSummary, ArticlesApi, RemoteArticle};
use article_sync::sync::{ArticlesRepository, SyncCoordinator};
use article_sync::NetworkError;
use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

async fn setup_store() -> Arc<SqliteArticleStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    Arc::new(SqliteArticleStore::new(pool))
}

#[derive(Clone, Default)]
struct RecordingApi {
    pages: Arc<Mutex<VecDeque<Result<Vec<ArticleSummary>, NetworkError>>>>,
    details: Arc<Mutex<VecDeque<Result<ArticleDetail, NetworkError>>>>,
    page_calls: Arc<Mutex<Vec<(u32, u32)>>>,
    detail_calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingApi {
    async fn push_page(&self, page: Result<Vec<ArticleSummary>, NetworkError>) {
        self.pages.lock().await.push_back(page);
    }

    async fn push_detail(&self, detail: Result<ArticleDetail, NetworkError>) {
        self.details.lock().await.push_back(detail);
    }

    async fn page_calls(&self) -> Vec<(u32, u32)> {
        self.page_calls.lock().await.clone()
    }

    async fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ArticlesApi for RecordingApi {
    async fn fetch_article_list(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ArticleSummary>, NetworkError> {
        self.page_calls.lock().await.push((page, per_page));
        self.pages.lock().await.pop_front().unwrap_or(Ok(vec![]))
    }

    async fn fetch_article_detail(&self, id: &str) -> Result<ArticleDetail, NetworkError> {
        self.detail_calls.lock().await.push(id.to_string());
        self.details
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(NetworkError::HttpStatus(404)))
    }
}

fn remote(id: i64, author: &str) -> RemoteArticle {
    RemoteArticle {
        id,
        title: format!("Title {id}"),
        summary: format!("Summary {id}"),
        published_at: Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, id as u32 % 60).unwrap()),
        author_name: author.into(),
        body_markdown: None,
        body_html: None,
    }
}

fn coordinator(api: &RecordingApi, store: &Arc<SqliteArticleStore>) -> SyncCoordinator {
    SyncCoordinator::new(Arc::new(api.clone()), store.clone())
}

#[tokio::test]
async fn fetch_page_stores_mapped_batch_and_reports_count() {
    let store = setup_store().await;
    let api = RecordingApi::default();
    let mut undated = remote(3, "Cy");
    undated.published_at = None;
    undated.body_markdown = Some(String::new());
    undated.body_html = Some("<p>html</p>".into());
    api.push_page(Ok(vec![remote(1, "Ana"), remote(2, "Bo"), undated]))
        .await;
    let repo = coordinator(&api, &store);

    let count = repo.fetch_page(1, 20).await.unwrap();
    assert_eq!(count, 3);
    assert_eq!(api.page_calls().await, vec![(1, 20)]);

    let mut query = repo.observe_list(ArticleFilter::default());
    let items = timeout(Duration::from_secs(2), query.next())
        .await
        .unwrap()
        .unwrap();
    let ids: Vec<&str> = items.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "1", "3"], "undated articles sort last");
    assert_eq!(items[2].published_at, UNKNOWN_PUBLISHED_AT);
    assert_eq!(items[2].content, "<p>html</p>");
    assert_eq!(items[0].author, "Bo");
}

#[tokio::test]
async fn records_without_an_id_are_dropped_but_counted() {
    let store = setup_store().await;
    let api = RecordingApi::default();
    api.push_page(Ok(vec![remote(0, "Ana"), remote(4, "Bo"), remote(0, "Cy")]))
        .await;
    api.push_detail(Ok(remote(0, "Ana"))).await;
    let repo = coordinator(&api, &store);

    let count = repo.fetch_page(1, 3).await.unwrap();
    assert_eq!(count, 3, "page size detection sees every fetched record");
    assert_eq!(store.count().await.unwrap(), 1);
    assert!(store.observe_detail("0").next().await.unwrap().is_none());

    let err = repo.fetch_detail("9").await.unwrap_err();
    assert!(matches!(network_error(&err), Some(NetworkError::Decoding(_))));
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn fetch_page_propagates_remote_failure_untouched() {
    let store = setup_store().await;
    let api = RecordingApi::default();
    api.push_page(Err(NetworkError::HttpStatus(503))).await;
    let repo = coordinator(&api, &store);

    let err = repo.fetch_page(2, 10).await.unwrap_err();
    assert_eq!(network_error(&err), Some(&NetworkError::HttpStatus(503)));
    assert!(user_message(&err).contains("503"));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn fetch_detail_fills_body_and_list_refresh_keeps_it() {
    let store = setup_store().await;
    let api = RecordingApi::default();
    api.push_page(Ok(vec![remote(77, "Ana")])).await;
    let mut detail = remote(77, "Ana");
    detail.body_markdown = Some("# Realm".into());
    detail.body_html = Some("<h1>Realm</h1>".into());
    api.push_detail(Ok(detail)).await;
    api.push_page(Ok(vec![remote(77, "Ana")])).await;
    let repo = coordinator(&api, &store);

    repo.fetch_page(1, 20).await.unwrap();
    repo.fetch_detail("77").await.unwrap();
    repo.fetch_page(1, 20).await.unwrap();

    assert_eq!(api.detail_calls().await, vec!["77".to_string()]);
    let mut query = repo.observe_detail("77");
    let stored = timeout(Duration::from_secs(2), query.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stored.content, "# Realm");
}

#[tokio::test]
async fn fetch_detail_without_body_keeps_cached_body() {
    let store = setup_store().await;
    let api = RecordingApi::default();
    let mut full = remote(5, "Ana");
    full.body_html = Some("<p>kept</p>".into());
    api.push_detail(Ok(full)).await;
    let mut renamed = remote(5, "Ana");
    renamed.title = "Renamed".into();
    api.push_detail(Ok(renamed)).await;
    let repo = coordinator(&api, &store);

    repo.fetch_detail("5").await.unwrap();
    repo.fetch_detail("5").await.unwrap();

    let mut query = repo.observe_detail("5");
    let stored = timeout(Duration::from_secs(2), query.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stored.title, "Renamed");
    assert_eq!(stored.content, "<p>kept</p>");
}

#[tokio::test]
async fn fetch_detail_offline_is_classified() {
    let store = setup_store().await;
    let api = RecordingApi::default();
    api.push_detail(Err(NetworkError::Offline)).await;
    let repo = coordinator(&api, &store);

    let err = repo.fetch_detail("1").await.unwrap_err();
    assert!(article_sync::error::is_offline(&err));
    assert!(store.observe_detail("1").next().await.unwrap().is_none());
}
