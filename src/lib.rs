//! Offline-first article reader core: a remote article API cached in SQLite,
//! live queries over the cache, and list/detail view-states driving both.

pub mod config;
pub mod db;
pub mod error;
pub mod live;
pub mod model;
pub mod remote;
pub mod sync;
pub mod view;

pub use error::NetworkError;
pub use model::{Article, ArticleFilter, PageCursor};
pub use sync::{ArticlesRepository, SyncCoordinator};
