use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Publish date used when the remote record carries none. Sorts after every
/// real date in a newest-first listing.
pub const UNKNOWN_PUBLISHED_AT: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// Article as seen by consumers of the cache.
///
/// `content` is empty for articles that only arrived through a list page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub author: String,
    pub published_at: DateTime<Utc>,
    pub content: String,
}

impl Article {
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// Text searched by [`ArticleFilter`]: title, summary and author,
    /// lowercased with full Unicode case mapping.
    pub fn search_key(&self) -> String {
        search_key(&self.title, &self.summary, &self.author)
    }
}

pub(crate) fn search_key(title: &str, summary: &str, author: &str) -> String {
    format!("{title}\n{summary}\n{author}").to_lowercase()
}

/// Normalized search/author predicate applied by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArticleFilter {
    pub search_text: Option<String>,
    pub author: Option<String>,
}

impl ArticleFilter {
    /// Build a filter from raw user input. Blank values impose no constraint.
    pub fn new(search_text: Option<&str>, author: Option<&str>) -> Self {
        Self {
            search_text: normalize(search_text),
            author: normalize(author),
        }
    }

    pub fn is_active(&self) -> bool {
        self.search_text.is_some() || self.author.is_some()
    }

    /// Lowercased search needle, compared against [`Article::search_key`].
    pub fn search_needle(&self) -> Option<String> {
        self.search_text.as_deref().map(str::to_lowercase)
    }

    /// In-memory evaluation of the predicate. Same rule as the store query:
    /// substring of the search key, exact author.
    pub fn matches(&self, article: &Article) -> bool {
        if let Some(author) = &self.author {
            if article.author != *author {
                return false;
            }
        }
        match self.search_needle() {
            Some(needle) => article.search_key().contains(&needle),
            None => true,
        }
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Pagination progress for incremental list loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub current_page: u32,
    pub has_more: bool,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self {
            current_page: 0,
            has_more: true,
        }
    }
}

impl PageCursor {
    pub fn next_page(&self) -> u32 {
        self.current_page + 1
    }

    /// Record a fetched page. A short page marks the feed as exhausted.
    pub fn record_page(&mut self, page: u32, fetched: usize, per_page: u32) {
        self.current_page = self.current_page.max(page);
        self.has_more = fetched >= per_page as usize;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
