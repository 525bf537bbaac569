use super::model::{from_millis, to_millis, ArticleRecord};
use crate::model::{search_key, Article, ArticleFilter};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{info, instrument};

pub type Pool = SqlitePool;

const ARTICLE_COLUMNS: &str =
    "id, title, summary, author, published_at, content, updated_at, content_updated_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure the parent
/// directory exists. In-memory and non-sqlite URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{expanded}?{q}"),
        None => format!("sqlite://{expanded}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    backfill_search_keys(pool).await?;
    Ok(())
}

/// Fill `search_key` for rows written before the column existed. SQLite's
/// `lower()` only folds ASCII, so the key is computed here.
async fn backfill_search_keys(pool: &Pool) -> Result<()> {
    let rows: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT id, title, summary, author FROM articles \
         WHERE search_key = '' AND (title <> '' OR summary <> '' OR author <> '')",
    )
    .fetch_all(pool)
    .await?;
    if rows.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for (id, title, summary, author) in &rows {
        sqlx::query("UPDATE articles SET search_key = ? WHERE id = ?")
            .bind(search_key(title, summary, author))
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    info!(rows = rows.len(), "backfilled article search keys");
    Ok(())
}

/// Upsert a list page in one transaction.
///
/// Summary fields are always overwritten. The body is written only when the
/// row is new, so a list refresh never erases a previously fetched body.
#[instrument(skip_all, fields(count = articles.len()))]
pub async fn upsert_articles(pool: &Pool, articles: &[Article], now: DateTime<Utc>) -> Result<()> {
    if articles.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for article in articles {
        if row_exists(&mut tx, &article.id).await? {
            update_summary_fields(&mut tx, article, now).await?;
        } else {
            insert_article(&mut tx, article, now).await?;
        }
    }
    tx.commit().await?;
    Ok(())
}

/// Upsert a single fully fetched article. An empty body never replaces a
/// stored one; a non-empty body always does.
#[instrument(skip_all, fields(id = %article.id))]
pub async fn upsert_article_detail(pool: &Pool, article: &Article, now: DateTime<Utc>) -> Result<()> {
    let mut tx = pool.begin().await?;
    if row_exists(&mut tx, &article.id).await? {
        update_summary_fields(&mut tx, article, now).await?;
        if article.has_content() {
            sqlx::query("UPDATE articles SET content = ?, content_updated_at = ? WHERE id = ?")
                .bind(&article.content)
                .bind(to_millis(now))
                .bind(&article.id)
                .execute(&mut *tx)
                .await?;
        }
    } else {
        insert_article(&mut tx, article, now).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn row_exists(tx: &mut Transaction<'_, Sqlite>, id: &str) -> Result<bool> {
    let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM articles WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(found.is_some())
}

async fn update_summary_fields(
    tx: &mut Transaction<'_, Sqlite>,
    article: &Article,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE articles SET title = ?, summary = ?, author = ?, search_key = ?, published_at = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&article.title)
    .bind(&article.summary)
    .bind(&article.author)
    .bind(article.search_key())
    .bind(to_millis(article.published_at))
    .bind(to_millis(now))
    .bind(&article.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_article(
    tx: &mut Transaction<'_, Sqlite>,
    article: &Article,
    now: DateTime<Utc>,
) -> Result<()> {
    let content_updated_at = article.has_content().then(|| to_millis(now));
    sqlx::query(
        "INSERT INTO articles \
         (id, title, summary, author, search_key, published_at, content, updated_at, content_updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&article.id)
    .bind(&article.title)
    .bind(&article.summary)
    .bind(&article.author)
    .bind(article.search_key())
    .bind(to_millis(article.published_at))
    .bind(&article.content)
    .bind(to_millis(now))
    .bind(content_updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Articles matching `filter`, newest first.
///
/// The search needle is lowercased here and looked up with `instr` in the
/// precomputed `search_key`, so case folding is Unicode-aware and `%`/`_`
/// are plain characters.
#[instrument(skip_all)]
pub async fn query_articles(pool: &Pool, filter: &ArticleFilter) -> Result<Vec<Article>> {
    let needle = filter.search_needle();
    let sql = format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles
          WHERE (? IS NULL OR instr(search_key, ?) > 0)
            AND (? IS NULL OR author = ?)
          ORDER BY published_at DESC, id ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(needle.as_deref())
        .bind(needle.as_deref())
        .bind(filter.author.as_deref())
        .bind(filter.author.as_deref())
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| record_from_row(row).map(ArticleRecord::into_article))
        .collect()
}

#[instrument(skip_all)]
pub async fn find_article(pool: &Pool, id: &str) -> Result<Option<Article>> {
    Ok(find_record(pool, id).await?.map(ArticleRecord::into_article))
}

#[instrument(skip_all)]
pub async fn find_record(pool: &Pool, id: &str) -> Result<Option<ArticleRecord>> {
    let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(record_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn count_articles(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Distinct non-empty authors, sorted.
#[instrument(skip_all)]
pub async fn distinct_authors(pool: &Pool) -> Result<Vec<String>> {
    let authors: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT author FROM articles WHERE author <> '' ORDER BY author ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(authors)
}

fn record_from_row(row: &SqliteRow) -> Result<ArticleRecord> {
    Ok(ArticleRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        author: row.try_get("author")?,
        published_at: from_millis(row.try_get("published_at")?),
        content: row.try_get("content")?,
        updated_at: from_millis(row.try_get("updated_at")?),
        content_updated_at: row
            .try_get::<Option<i64>, _>("content_updated_at")?
            .map(from_millis),
    })
}
