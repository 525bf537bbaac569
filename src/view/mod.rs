//! View-state machines for presentation.
//!
//! Each view-state runs as a single task that owns all of its state. The
//! public handle only sends commands and reads the latest published snapshot,
//! so every guard flag is checked and set on that one task.

pub mod detail;
pub mod list;

pub use detail::{DetailSnapshot, DetailState, DetailViewState};
pub use list::{ListSnapshot, ListState, ListViewConfig, ListViewState};

use std::future;
use tokio::time::{sleep_until, Instant};

use crate::live::LiveQuery;

/// Next item of an optional subscription; pends forever when there is none.
/// `None` means the subscription ended.
async fn next_snapshot<T>(query: &mut Option<LiveQuery<T>>) -> Option<T> {
    match query {
        Some(query) => query.next().await,
        None => future::pending().await,
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
