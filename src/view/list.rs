//! Article list view-state: live filtered listing, debounced search and
//! author filters, incremental paging and quiet offline degradation.
use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{deadline_elapsed, next_snapshot, DetailViewState};
use crate::config::SyncSettings;
use crate::error::{is_offline, user_message};
use crate::live::LiveQuery;
use crate::model::{Article, ArticleFilter, PageCursor};
use crate::sync::ArticlesRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListState {
    Loading,
    Loaded(Vec<Article>),
    Empty,
    Error(String),
}

/// Everything presentation reads from the list view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSnapshot {
    pub state: ListState,
    pub search_query: String,
    pub author_filter: Option<String>,
    /// Distinct authors across every cached article, sorted.
    pub available_authors: Vec<String>,
    pub cursor: PageCursor,
    pub is_loading_page: bool,
}

impl Default for ListSnapshot {
    fn default() -> Self {
        Self {
            state: ListState::Loading,
            search_query: String::new(),
            author_filter: None,
            available_authors: Vec::new(),
            cursor: PageCursor::default(),
            is_loading_page: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListViewConfig {
    pub page_size: u32,
    pub search_debounce: Duration,
}

impl Default for ListViewConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            search_debounce: Duration::from_millis(250),
        }
    }
}

impl From<&SyncSettings> for ListViewConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            page_size: settings.page_size,
            search_debounce: settings.search_debounce(),
        }
    }
}

#[derive(Debug)]
enum ListCommand {
    Start,
    Stop,
    Refresh,
    LoadMore,
    SetSearchQuery(String),
    SetAuthorFilter(Option<String>),
}

struct PageFetched {
    session: u64,
    page: u32,
    result: Result<usize>,
}

/// Handle to a running list view-state. Dropping it ends the task.
pub struct ListViewState {
    repository: Arc<dyn ArticlesRepository>,
    commands: mpsc::UnboundedSender<ListCommand>,
    snapshot: watch::Receiver<ListSnapshot>,
}

impl ListViewState {
    /// Spawn the view-state task. Must be called inside a tokio runtime.
    pub fn new(repository: Arc<dyn ArticlesRepository>, config: ListViewConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(ListSnapshot::default());
        let machine = ListMachine {
            repository: Arc::clone(&repository),
            config,
            commands: command_rx,
            fetch_tx,
            fetch_rx,
            snapshot: snapshot_tx,
            started: false,
            session: 0,
            state: ListState::Loading,
            items: None,
            search_query: String::new(),
            author_filter: None,
            applied_filter: ArticleFilter::default(),
            cursor: PageCursor::default(),
            page_in_flight: false,
            fetch_settled: false,
            cache_is_empty: true,
            available_authors: Vec::new(),
            list_query: None,
            catalog_query: None,
            debounce_deadline: None,
        };
        tokio::spawn(machine.run());
        Self {
            repository,
            commands,
            snapshot,
        }
    }

    pub fn start(&self) {
        self.send(ListCommand::Start);
    }

    pub fn stop(&self) {
        self.send(ListCommand::Stop);
    }

    pub fn refresh(&self) {
        self.send(ListCommand::Refresh);
    }

    pub fn load_more(&self) {
        self.send(ListCommand::LoadMore);
    }

    pub fn set_search_query(&self, query: impl Into<String>) {
        self.send(ListCommand::SetSearchQuery(query.into()));
    }

    pub fn set_author_filter(&self, author: Option<String>) {
        self.send(ListCommand::SetAuthorFilter(author));
    }

    pub fn snapshot(&self) -> ListSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> ListState {
        self.snapshot.borrow().state.clone()
    }

    pub fn available_authors(&self) -> Vec<String> {
        self.snapshot.borrow().available_authors.clone()
    }

    /// Receiver that is notified whenever the published snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<ListSnapshot> {
        self.snapshot.clone()
    }

    /// Detail view-state for one article, sharing this view's repository.
    pub fn detail(&self, id: impl Into<String>) -> DetailViewState {
        DetailViewState::new(id, Arc::clone(&self.repository))
    }

    fn send(&self, command: ListCommand) {
        // The task only stops once every handle is gone.
        let _ = self.commands.send(command);
    }
}

struct ListMachine {
    repository: Arc<dyn ArticlesRepository>,
    config: ListViewConfig,
    commands: mpsc::UnboundedReceiver<ListCommand>,
    fetch_tx: mpsc::UnboundedSender<PageFetched>,
    fetch_rx: mpsc::UnboundedReceiver<PageFetched>,
    snapshot: watch::Sender<ListSnapshot>,

    started: bool,
    /// Bumped on start and stop; fetch results from an older session are dropped.
    session: u64,
    state: ListState,
    /// Latest snapshot of the filtered query, `None` until one arrives.
    items: Option<Vec<Article>>,
    search_query: String,
    author_filter: Option<String>,
    /// Filter the live list query was subscribed with.
    applied_filter: ArticleFilter,
    cursor: PageCursor,
    page_in_flight: bool,
    fetch_settled: bool,
    cache_is_empty: bool,
    available_authors: Vec<String>,
    list_query: Option<LiveQuery<Vec<Article>>>,
    catalog_query: Option<LiveQuery<Vec<Article>>>,
    debounce_deadline: Option<Instant>,
}

impl ListMachine {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command);
                }
                Some(fetched) = self.fetch_rx.recv() => self.on_page_fetched(fetched),
                items = next_snapshot(&mut self.list_query) => self.on_list_snapshot(items),
                items = next_snapshot(&mut self.catalog_query) => self.on_catalog_snapshot(items),
                () = deadline_elapsed(self.debounce_deadline) => self.on_debounce_elapsed(),
            }
            self.publish();
        }
        debug!("list view-state task finished");
    }

    fn handle(&mut self, command: ListCommand) {
        match command {
            ListCommand::Start => self.start(),
            ListCommand::Stop => self.stop(),
            ListCommand::Refresh => self.refresh(),
            ListCommand::LoadMore => self.load_more(),
            ListCommand::SetSearchQuery(query) => {
                if query != self.search_query {
                    debug!(from = %self.search_query, to = %query, "search query changed");
                    self.search_query = query;
                    self.schedule_debounce();
                }
            }
            ListCommand::SetAuthorFilter(author) => {
                if author != self.author_filter {
                    info!(author = ?author, "author filter changed");
                    self.author_filter = author;
                    self.schedule_debounce();
                }
            }
        }
    }

    fn start(&mut self) {
        if self.started {
            debug!("list view already started");
            return;
        }
        info!("list view start");
        self.started = true;
        self.session += 1;
        self.debounce_deadline = None;
        self.applied_filter = self.current_filter();
        self.list_query = Some(self.repository.observe_list(self.applied_filter.clone()));
        self.catalog_query = Some(self.repository.observe_list(ArticleFilter::default()));

        // The cursor survives stop/start; only a view that never stored a
        // page goes back to the network on its own.
        if self.cursor.current_page == 0 {
            if matches!(self.state, ListState::Error(_)) {
                self.state = ListState::Loading;
            }
            self.fetch_page(1);
        }
        self.derive_state();
    }

    fn stop(&mut self) {
        if !self.started {
            return;
        }
        info!("list view stop");
        self.started = false;
        self.session += 1;
        self.list_query = None;
        self.catalog_query = None;
        self.debounce_deadline = None;
        self.page_in_flight = false;
    }

    fn refresh(&mut self) {
        if !self.started {
            debug!("skipping refresh: list view not started");
            return;
        }
        if self.page_in_flight {
            debug!("skipping refresh: a page fetch is already in flight");
            return;
        }
        info!("list view refresh");
        self.cursor.reset();
        if matches!(self.state, ListState::Error(_)) {
            self.state = ListState::Loading;
        }
        self.fetch_page(1);
    }

    fn load_more(&mut self) {
        if !self.started {
            debug!("skipping loadMore: list view not started");
            return;
        }
        if self.current_filter().is_active() {
            debug!("skipping loadMore due to active search/filter");
            return;
        }
        if !self.cursor.has_more {
            debug!(page = self.cursor.current_page, "skipping loadMore (no more pages)");
            return;
        }
        if self.page_in_flight {
            debug!("skipping loadMore: a page fetch is already in flight");
            return;
        }
        self.fetch_page(self.cursor.next_page());
    }

    fn fetch_page(&mut self, page: u32) {
        let per_page = self.config.page_size;
        info!(page, per_page, "fetching page");
        self.page_in_flight = true;

        let repository = Arc::clone(&self.repository);
        let done = self.fetch_tx.clone();
        let session = self.session;
        tokio::spawn(async move {
            let result = repository.fetch_page(page, per_page).await;
            let _ = done.send(PageFetched {
                session,
                page,
                result,
            });
        });
    }

    fn on_page_fetched(&mut self, fetched: PageFetched) {
        let PageFetched {
            session,
            page,
            result,
        } = fetched;
        if session != self.session {
            debug!(page, "dropping page result from a stopped session");
            return;
        }
        self.page_in_flight = false;
        self.fetch_settled = true;

        match result {
            Ok(count) => {
                self.cursor.record_page(page, count, self.config.page_size);
                info!(page, count, has_more = self.cursor.has_more, "fetch success");
            }
            Err(err) if is_offline(&err) => {
                warn!(page, cache_is_empty = self.cache_is_empty, "fetch offline; staying on cached data");
            }
            Err(err) => {
                error!(?err, page, "fetch failed");
                if self.cache_is_empty {
                    self.state = ListState::Error(user_message(&err));
                }
            }
        }
        self.derive_state();
    }

    fn on_list_snapshot(&mut self, items: Option<Vec<Article>>) {
        let Some(items) = items else {
            warn!("list live query ended; keeping the current state");
            self.list_query = None;
            return;
        };
        debug!(count = items.len(), "list snapshot");
        self.items = Some(items);
        self.derive_state();
    }

    fn on_catalog_snapshot(&mut self, items: Option<Vec<Article>>) {
        let Some(items) = items else {
            warn!("catalog live query ended; keeping the current authors");
            self.catalog_query = None;
            return;
        };
        self.cache_is_empty = items.is_empty();
        let authors: BTreeSet<&str> = items
            .iter()
            .map(|a| a.author.as_str())
            .filter(|a| !a.is_empty())
            .collect();
        self.available_authors = authors.into_iter().map(str::to_string).collect();
        debug!(
            count = items.len(),
            authors = self.available_authors.len(),
            "catalog snapshot"
        );
    }

    fn schedule_debounce(&mut self) {
        self.debounce_deadline = Some(Instant::now() + self.config.search_debounce);
    }

    fn on_debounce_elapsed(&mut self) {
        self.debounce_deadline = None;
        let filter = self.current_filter();
        if filter == self.applied_filter {
            debug!("debounce fired with unchanged filter");
            return;
        }
        debug!(?filter, "debounce fired; re-querying");
        self.applied_filter = filter;
        if self.started {
            self.list_query = Some(self.repository.observe_list(self.applied_filter.clone()));
        }
    }

    fn current_filter(&self) -> ArticleFilter {
        ArticleFilter::new(Some(&self.search_query), self.author_filter.as_deref())
    }

    fn derive_state(&mut self) {
        let keep_error = matches!(self.state, ListState::Error(_));
        self.state = match self.items.as_deref() {
            Some(items) if !items.is_empty() => ListState::Loaded(items.to_vec()),
            _ if keep_error => return,
            Some(_) if self.fetch_settled => ListState::Empty,
            _ => ListState::Loading,
        };
    }

    fn publish(&self) {
        let next = ListSnapshot {
            state: self.state.clone(),
            search_query: self.search_query.clone(),
            author_filter: self.author_filter.clone(),
            available_authors: self.available_authors.clone(),
            cursor: self.cursor,
            is_loading_page: self.page_in_flight,
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
