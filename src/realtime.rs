use std::future::Future;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::Result;

/// Channel the table triggers publish on.
pub const CHANNEL: &str = "eit_track_changes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub table: String,
    pub event: ChangeKind,
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub record: serde_json::Value,
}

/// What a subscriber's handler receives.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change(RowChange),
    /// The subscriber fell behind and `skipped` changes were dropped.
    /// Handlers should reload from the backend.
    Resync { skipped: u64 },
}

#[derive(Debug, Clone)]
pub struct ChangeFilter {
    pub user_id: Uuid,
    pub tables: Vec<&'static str>,
    pub events: Option<Vec<ChangeKind>>,
}

impl ChangeFilter {
    pub fn new(user_id: Uuid, tables: &[&'static str]) -> Self {
        Self {
            user_id,
            tables: tables.to_vec(),
            events: None,
        }
    }

    pub fn only(mut self, events: &[ChangeKind]) -> Self {
        self.events = Some(events.to_vec());
        self
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        change.user_id == Some(self.user_id)
            && self.tables.iter().any(|table| *table == change.table)
            && self
                .events
                .as_ref()
                .map_or(true, |events| events.contains(&change.event))
    }
}

/// Handle to a running subscription task. Dropping it stops the task.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn dispose(self) {
        self.handle.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Fan-out hub for row changes.
pub struct ChangeFeed {
    sender: broadcast::Sender<RowChange>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, change: RowChange) {
        // no subscribers is fine
        let _ = self.sender.send(change);
    }

    /// Pumps Postgres notifications on [`CHANNEL`] into the hub.
    pub async fn listen(&self, pool: &PgPool) -> Result<Subscription> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(CHANNEL).await?;

        let sender = self.sender.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match serde_json::from_str::<RowChange>(notification.payload()) {
                            Ok(change) => {
                                debug!(table = %change.table, event = ?change.event, "row change");
                                let _ = sender.send(change);
                            }
                            Err(e) => warn!("discarding malformed change payload: {e}"),
                        }
                    }
                    Err(e) => {
                        error!("change listener stopped: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Subscription { handle })
    }

    /// Runs `handler` for each matching change, one at a time, until the
    /// returned subscription is dropped or disposed. A lagging subscriber
    /// gets [`FeedEvent::Resync`] in place of the changes it missed.
    pub fn subscribe<F, Fut>(&self, filter: ChangeFilter, handler: F) -> Subscription
    where
        F: Fn(FeedEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(change) if filter.matches(&change) => handler(FeedEvent::Change(change)).await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(identity = %filter.user_id, skipped, "subscriber lagged behind change feed");
                        handler(FeedEvent::Resync { skipped }).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription { handle }
    }
}
