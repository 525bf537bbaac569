use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

use article_sync::config;
use article_sync::db::SqliteArticleStore;
use article_sync::error::user_message;
use article_sync::model::{Article, ArticleFilter, UNKNOWN_PUBLISHED_AT};
use article_sync::remote::HttpArticlesApi;
use article_sync::sync::{ArticlesRepository, SyncCoordinator};
use article_sync::view::{
    DetailSnapshot, DetailState, DetailViewState, ListSnapshot, ListState, ListViewConfig,
    ListViewState,
};

/// How long a view may take to settle before the command gives up.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Grace period for the store to deliver rows written by a just-finished fetch.
const EMISSION_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(author, version, about = "Offline-first article cache")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch article pages into the local cache
    Fetch {
        /// Stop after this many pages even if more remain
        #[arg(long, default_value = "1")]
        pages: u32,
    },
    /// Print cached articles, refreshing page 1 first
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print one article, fetching its body if the cache has none
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Print every change of the matching article set until Ctrl-C
    Watch {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        author: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let store = Arc::new(SqliteArticleStore::open(&cfg.database_url()).await?);
    let api = HttpArticlesApi::from_config(&cfg).context("building HTTP client")?;
    let coordinator = Arc::new(SyncCoordinator::new(Arc::new(api), store.clone()));

    match args.command {
        Command::Fetch { pages } => {
            fetch_pages(coordinator.as_ref(), cfg.sync.page_size, pages).await?;
            let total = store.count().await?;
            let authors = store.authors().await?;
            println!("{total} articles cached from {} authors", authors.len());
        }
        Command::List {
            search,
            author,
            json,
        } => {
            let view = ListViewState::new(coordinator, ListViewConfig::from(&cfg.sync));
            let snapshot = settle_list(&view, search, author).await?;
            print_list(&snapshot, json)?;
        }
        Command::Show { id, json } => {
            let view = DetailViewState::new(id, coordinator);
            let snapshot = settle_detail(&view).await?;
            print_detail(view.article_id(), &snapshot, json)?;
        }
        Command::Watch { search, author } => {
            let filter = ArticleFilter::new(search.as_deref(), author.as_deref());
            watch_articles(coordinator.as_ref(), filter).await?;
        }
    }

    Ok(())
}

async fn fetch_pages(repo: &dyn ArticlesRepository, per_page: u32, pages: u32) -> Result<()> {
    for page in 1..=pages.max(1) {
        let count = match repo.fetch_page(page, per_page).await {
            Ok(count) => count,
            Err(err) => bail!("page {page}: {}", user_message(&err)),
        };
        println!("page {page}: {count} articles");
        if count < per_page as usize {
            info!(page, "short page; no more pages");
            break;
        }
    }
    Ok(())
}

async fn settle_list(
    view: &ListViewState,
    search: Option<String>,
    author: Option<String>,
) -> Result<ListSnapshot> {
    let mut rx = view.subscribe();
    if let Some(search) = search {
        view.set_search_query(search);
    }
    view.set_author_filter(author);
    view.start();

    let settled = |s: &ListSnapshot| s.state != ListState::Loading && !s.is_loading_page;
    let snapshot = timeout(SETTLE_TIMEOUT, rx.wait_for(settled))
        .await
        .context("list did not settle")??
        .clone();
    if snapshot.state != ListState::Empty {
        return Ok(snapshot);
    }
    // A fetch can finish before the store has re-emitted the rows it wrote.
    Ok(wait_briefly(&mut rx, |s| matches!(s.state, ListState::Loaded(_)))
        .await
        .unwrap_or(snapshot))
}

async fn settle_detail(view: &DetailViewState) -> Result<DetailSnapshot> {
    let mut rx = view.subscribe();
    view.start();

    let first = timeout(
        SETTLE_TIMEOUT,
        rx.wait_for(|s| s.article.is_some() || s.is_missing_offline),
    )
    .await
    .context("article store did not answer")??
    .clone();

    if first.article.is_none() {
        rx.borrow_and_update();
        view.refresh();
        timeout(SETTLE_TIMEOUT, rx.changed())
            .await
            .context("refresh did not start")??;
    }

    let snapshot = timeout(
        SETTLE_TIMEOUT,
        rx.wait_for(|s| s.state != DetailState::Loading),
    )
    .await
    .context("article did not settle")??
    .clone();
    if snapshot.article.is_some() || snapshot.state != DetailState::Idle {
        return Ok(snapshot);
    }
    Ok(wait_briefly(&mut rx, |s| s.article.is_some())
        .await
        .unwrap_or(snapshot))
}

async fn wait_briefly<T: Clone>(
    rx: &mut watch::Receiver<T>,
    predicate: impl FnMut(&T) -> bool,
) -> Option<T> {
    match timeout(EMISSION_GRACE, rx.wait_for(predicate)).await {
        Ok(Ok(value)) => Some(value.clone()),
        _ => None,
    }
}

async fn watch_articles(repo: &dyn ArticlesRepository, filter: ArticleFilter) -> Result<()> {
    info!(?filter, "watching articles; Ctrl-C to stop");
    let mut stream = Box::pin(repo.observe_list(filter).into_stream());
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(articles) => {
                    println!("--- {} articles", articles.len());
                    for article in &articles {
                        println!("{}", summary_line(article));
                    }
                }
                None => {
                    warn!("live query ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

fn summary_line(article: &Article) -> String {
    let date = if article.published_at == UNKNOWN_PUBLISHED_AT {
        "----------".to_string()
    } else {
        article.published_at.format("%Y-%m-%d").to_string()
    };
    let author = if article.author.is_empty() {
        "?"
    } else {
        article.author.as_str()
    };
    format!("{date}  {:>8}  {author}: {}", article.id, article.title)
}

fn print_list(snapshot: &ListSnapshot, json: bool) -> Result<()> {
    match &snapshot.state {
        ListState::Loaded(articles) if json => {
            println!("{}", serde_json::to_string_pretty(articles)?);
        }
        ListState::Loaded(articles) => {
            for article in articles {
                println!("{}", summary_line(article));
            }
            if !snapshot.available_authors.is_empty() {
                println!("authors: {}", snapshot.available_authors.join(", "));
            }
        }
        ListState::Empty if json => println!("[]"),
        ListState::Empty => println!("no articles"),
        ListState::Error(message) => bail!("{message}"),
        ListState::Loading => bail!("list is still loading"),
    }
    Ok(())
}

fn print_detail(id: &str, snapshot: &DetailSnapshot, json: bool) -> Result<()> {
    if let DetailState::Error(message) = &snapshot.state {
        bail!("{message}");
    }
    match &snapshot.article {
        Some(article) if json => println!("{}", serde_json::to_string_pretty(article)?),
        Some(article) => {
            println!("{}", summary_line(article));
            if !article.summary.is_empty() {
                println!("\n{}", article.summary);
            }
            if article.has_content() {
                println!("\n{}", article.content);
            } else {
                println!("\n(body not available offline)");
            }
        }
        None if snapshot.is_missing_offline => {
            println!("article {id} is not cached and could not be fetched");
        }
        None => println!("article {id} not found"),
    }
    Ok(())
}
