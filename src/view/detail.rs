//! Single-article view-state with one automatic refresh when the cached copy
//! has no body yet.
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::next_snapshot;
use crate::error::{is_offline, user_message};
use crate::live::LiveQuery;
use crate::model::Article;
use crate::sync::ArticlesRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailState {
    Idle,
    Loading,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailSnapshot {
    pub state: DetailState,
    pub article: Option<Article>,
    /// No cached copy and nothing could be fetched.
    pub is_missing_offline: bool,
}

impl Default for DetailSnapshot {
    fn default() -> Self {
        Self {
            state: DetailState::Idle,
            article: None,
            is_missing_offline: false,
        }
    }
}

#[derive(Debug)]
enum DetailCommand {
    Start,
    Stop,
    Refresh,
}

struct DetailFetched {
    session: u64,
    result: Result<()>,
}

/// Handle to a running detail view-state. Dropping it ends the task.
pub struct DetailViewState {
    article_id: String,
    commands: mpsc::UnboundedSender<DetailCommand>,
    snapshot: watch::Receiver<DetailSnapshot>,
}

impl DetailViewState {
    /// Spawn the view-state task. Must be called inside a tokio runtime.
    pub fn new(article_id: impl Into<String>, repository: Arc<dyn ArticlesRepository>) -> Self {
        let article_id = article_id.into();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(DetailSnapshot::default());
        let machine = DetailMachine {
            article_id: article_id.clone(),
            repository,
            commands: command_rx,
            fetch_tx,
            fetch_rx,
            snapshot: snapshot_tx,
            started: false,
            session: 0,
            state: DetailState::Idle,
            article: None,
            is_missing_offline: false,
            did_auto_refresh: false,
            is_refreshing: false,
            query: None,
        };
        tokio::spawn(machine.run());
        Self {
            article_id,
            commands,
            snapshot,
        }
    }

    pub fn article_id(&self) -> &str {
        &self.article_id
    }

    pub fn start(&self) {
        let _ = self.commands.send(DetailCommand::Start);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(DetailCommand::Stop);
    }

    pub fn refresh(&self) {
        let _ = self.commands.send(DetailCommand::Refresh);
    }

    pub fn snapshot(&self) -> DetailSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DetailSnapshot> {
        self.snapshot.clone()
    }
}

struct DetailMachine {
    article_id: String,
    repository: Arc<dyn ArticlesRepository>,
    commands: mpsc::UnboundedReceiver<DetailCommand>,
    fetch_tx: mpsc::UnboundedSender<DetailFetched>,
    fetch_rx: mpsc::UnboundedReceiver<DetailFetched>,
    snapshot: watch::Sender<DetailSnapshot>,

    started: bool,
    session: u64,
    state: DetailState,
    article: Option<Article>,
    is_missing_offline: bool,
    did_auto_refresh: bool,
    is_refreshing: bool,
    query: Option<LiveQuery<Option<Article>>>,
}

impl DetailMachine {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    match command {
                        DetailCommand::Start => self.start(),
                        DetailCommand::Stop => self.stop(),
                        DetailCommand::Refresh => self.refresh(),
                    }
                }
                Some(fetched) = self.fetch_rx.recv() => self.on_fetched(fetched),
                item = next_snapshot(&mut self.query) => self.on_snapshot(item),
            }
            self.publish();
        }
        debug!(id = %self.article_id, "detail view-state task finished");
    }

    fn start(&mut self) {
        if self.started {
            debug!(id = %self.article_id, "detail view already started");
            return;
        }
        info!(id = %self.article_id, "detail view start");
        self.started = true;
        self.session += 1;
        self.query = Some(self.repository.observe_detail(&self.article_id));
    }

    fn stop(&mut self) {
        if !self.started {
            return;
        }
        info!(id = %self.article_id, "detail view stop");
        self.started = false;
        self.session += 1;
        self.query = None;
        self.did_auto_refresh = false;
        self.is_refreshing = false;
        if self.state == DetailState::Loading {
            self.state = DetailState::Idle;
        }
    }

    fn refresh(&mut self) {
        if !self.started {
            debug!(id = %self.article_id, "skipping refresh: detail view not started");
            return;
        }
        if self.is_refreshing {
            debug!(id = %self.article_id, "skipping refresh: already refreshing");
            return;
        }
        self.begin_refresh();
    }

    fn begin_refresh(&mut self) {
        info!(id = %self.article_id, "refreshing article");
        self.is_refreshing = true;
        self.state = DetailState::Loading;

        let repository = Arc::clone(&self.repository);
        let done = self.fetch_tx.clone();
        let id = self.article_id.clone();
        let session = self.session;
        tokio::spawn(async move {
            let result = repository.fetch_detail(&id).await;
            let _ = done.send(DetailFetched { session, result });
        });
    }

    fn on_snapshot(&mut self, item: Option<Option<Article>>) {
        let Some(item) = item else {
            warn!(id = %self.article_id, "detail live query ended; keeping the current article");
            self.query = None;
            return;
        };
        self.is_missing_offline = item.is_none();
        let needs_body = item.as_ref().is_some_and(|article| !article.has_content());
        if item.is_some() && matches!(self.state, DetailState::Error(_)) {
            self.state = DetailState::Idle;
        }
        self.article = item;

        if needs_body && !self.did_auto_refresh && !self.is_refreshing {
            debug!(id = %self.article_id, "cached article has no body; auto refresh");
            self.did_auto_refresh = true;
            self.begin_refresh();
        }
    }

    fn on_fetched(&mut self, fetched: DetailFetched) {
        if fetched.session != self.session {
            debug!(id = %self.article_id, "dropping detail result from a stopped session");
            return;
        }
        self.is_refreshing = false;
        self.state = DetailState::Idle;

        match fetched.result {
            Ok(()) => info!(id = %self.article_id, "detail refresh succeeded"),
            Err(err) if is_offline(&err) => {
                warn!(id = %self.article_id, cached = self.article.is_some(), "detail refresh offline");
                if self.article.is_none() {
                    self.is_missing_offline = true;
                }
            }
            Err(err) => {
                error!(?err, id = %self.article_id, "detail refresh failed");
                if self.article.is_none() {
                    self.state = DetailState::Error(user_message(&err));
                }
            }
        }
    }

    fn publish(&self) {
        let next = DetailSnapshot {
            state: self.state.clone(),
            article: self.article.clone(),
            is_missing_offline: self.is_missing_offline,
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
