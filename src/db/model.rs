//! Persisted row models returned by repositories.
//!
//! Keep these structs focused on the data stored in the table. Merge rules
//! live in `repo`.

use chrono::{DateTime, Utc};

use crate::model::{Article, UNKNOWN_PUBLISHED_AT};

/// Full `articles` row including write bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRecord {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub author: String,
    pub published_at: DateTime<Utc>,
    pub content: String,
    /// Set on every write to the row.
    pub updated_at: DateTime<Utc>,
    /// Set only when a non-empty body is written.
    pub content_updated_at: Option<DateTime<Utc>>,
}

impl ArticleRecord {
    pub fn into_article(self) -> Article {
        Article {
            id: self.id,
            title: self.title,
            summary: self.summary,
            author: self.author,
            published_at: self.published_at,
            content: self.content,
        }
    }
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(UNKNOWN_PUBLISHED_AT)
}
