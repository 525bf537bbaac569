//! Local article cache: SQLite repository functions, persisted row models and
//! the observable store built on top of them.
//!
//! - `model`: the persisted row with write bookkeeping.
//! - `repo`: SQL-only functions, including the body merge rules.
//! - `store`: `ArticleStore` and its SQLite implementation with live queries.

pub mod model;
pub mod repo;
pub mod store;

pub use model::ArticleRecord;
pub use repo::{init_pool, run_migrations, Pool};
pub use store::{ArticleStore, SqliteArticleStore};
