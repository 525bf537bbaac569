//! Live, observable article store on top of the SQLite repository.
//!
//! Writes are serialized through a write gate, one batch per transaction.
//! Every read that feeds a live query runs on a single observation worker,
//! which re-evaluates all open subscriptions after each committed write.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info};

use super::repo::{self, Pool};
use crate::live::{self, LivePublisher, LiveQuery};
use crate::model::{Article, ArticleFilter};

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Live list of articles matching `filter`, newest first.
    fn observe_list(&self, filter: ArticleFilter) -> LiveQuery<Vec<Article>>;

    /// Live projection of one row; `None` while the row does not exist.
    fn observe_detail(&self, id: &str) -> LiveQuery<Option<Article>>;

    async fn upsert_list(&self, articles: &[Article]) -> Result<()>;

    async fn upsert_detail(&self, article: &Article) -> Result<()>;
}

enum Registration {
    List {
        filter: ArticleFilter,
        publisher: LivePublisher<Vec<Article>>,
    },
    Detail {
        id: String,
        publisher: LivePublisher<Option<Article>>,
    },
}

impl Registration {
    fn is_closed(&self) -> bool {
        match self {
            Registration::List { publisher, .. } => publisher.is_closed(),
            Registration::Detail { publisher, .. } => publisher.is_closed(),
        }
    }
}

pub struct SqliteArticleStore {
    pool: Pool,
    write_gate: Mutex<()>,
    revision: watch::Sender<u64>,
    registrations: mpsc::UnboundedSender<Registration>,
}

impl SqliteArticleStore {
    /// Wrap a migrated pool. Must be called inside a tokio runtime: the
    /// observation worker is spawned here and lives as long as the store.
    pub fn new(pool: Pool) -> Self {
        let (revision, revision_rx) = watch::channel(0);
        let (registrations, registration_rx) = mpsc::unbounded_channel();
        let worker = ObservationWorker {
            pool: pool.clone(),
            registrations: registration_rx,
            revision: revision_rx,
            live: Vec::new(),
        };
        tokio::spawn(worker.run());
        Self {
            pool,
            write_gate: Mutex::new(()),
            revision,
            registrations,
        }
    }

    /// Open (creating if needed) and migrate the database at `database_url`.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = repo::init_pool(database_url).await?;
        repo::run_migrations(&pool).await?;
        info!("article store ready");
        Ok(Self::new(pool))
    }

    pub async fn count(&self) -> Result<i64> {
        repo::count_articles(&self.pool).await
    }

    pub async fn authors(&self) -> Result<Vec<String>> {
        repo::distinct_authors(&self.pool).await
    }

    fn register(&self, registration: Registration) {
        // A dead worker drops the registration, which ends the subscription.
        let _ = self.registrations.send(registration);
    }

    fn committed(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

#[async_trait]
impl ArticleStore for SqliteArticleStore {
    fn observe_list(&self, filter: ArticleFilter) -> LiveQuery<Vec<Article>> {
        let (publisher, query) = live::channel();
        self.register(Registration::List { filter, publisher });
        query
    }

    fn observe_detail(&self, id: &str) -> LiveQuery<Option<Article>> {
        let (publisher, query) = live::channel();
        self.register(Registration::Detail {
            id: id.to_string(),
            publisher,
        });
        query
    }

    async fn upsert_list(&self, articles: &[Article]) -> Result<()> {
        if articles.is_empty() {
            return Ok(());
        }
        let _gate = self.write_gate.lock().await;
        repo::upsert_articles(&self.pool, articles, Utc::now()).await?;
        self.committed();
        debug!(count = articles.len(), "list batch committed");
        Ok(())
    }

    async fn upsert_detail(&self, article: &Article) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        repo::upsert_article_detail(&self.pool, article, Utc::now()).await?;
        self.committed();
        debug!(id = %article.id, "detail committed");
        Ok(())
    }
}

struct ObservationWorker {
    pool: Pool,
    registrations: mpsc::UnboundedReceiver<Registration>,
    revision: watch::Receiver<u64>,
    live: Vec<Registration>,
}

impl ObservationWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                registration = self.registrations.recv() => {
                    let Some(registration) = registration else { break };
                    if self.evaluate(&registration).await {
                        self.live.push(registration);
                    }
                }
                changed = self.revision.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.revision.borrow_and_update();
                    self.reevaluate().await;
                }
            }
        }
        debug!("observation worker stopped");
    }

    async fn reevaluate(&mut self) {
        let registrations = std::mem::take(&mut self.live);
        for registration in registrations {
            if self.evaluate(&registration).await {
                self.live.push(registration);
            }
        }
    }

    /// Publish a fresh snapshot. Returns whether the subscription stays live.
    async fn evaluate(&self, registration: &Registration) -> bool {
        if registration.is_closed() {
            return false;
        }
        match registration {
            Registration::List { filter, publisher } => {
                match repo::query_articles(&self.pool, filter).await {
                    Ok(items) => publisher.publish(items),
                    Err(err) => {
                        error!(?err, ?filter, "live list query failed; ending subscription");
                        false
                    }
                }
            }
            Registration::Detail { id, publisher } => {
                match repo::find_article(&self.pool, id).await {
                    Ok(item) => publisher.publish(item),
                    Err(err) => {
                        error!(?err, id = %id, "live detail query failed; ending subscription");
                        false
                    }
                }
            }
        }
    }
}
