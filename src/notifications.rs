use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::Result;
use crate::mailer::{EmailTemplate, Mailer};
use crate::models::{NewNotification, Notification};
use crate::realtime::{ChangeFeed, ChangeFilter, ChangeKind, FeedEvent, Subscription};

/// Writes notification rows and fans out the matching email.
pub struct Notifier {
    backend: Arc<dyn Backend>,
    mailer: Arc<dyn Mailer>,
    emails: Mutex<JoinSet<()>>,
}

impl Notifier {
    pub fn new(backend: Arc<dyn Backend>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            backend,
            mailer,
            emails: Mutex::new(JoinSet::new()),
        }
    }

    /// Inserts the notification. The email, if any, is sent in the
    /// background and its failure is only logged.
    pub async fn notify(
        &self,
        notification: NewNotification,
        email: Option<EmailTemplate>,
    ) -> Result<Notification> {
        let row = self.backend.insert_notification(&notification).await?;

        if let Some(template) = email {
            let backend = Arc::clone(&self.backend);
            let mailer = Arc::clone(&self.mailer);
            let kind = row.kind.clone();
            let user_id = row.user_id;
            let mut emails = self.emails.lock().unwrap_or_else(PoisonError::into_inner);
            while emails.try_join_next().is_some() {}
            emails.spawn(async move {
                if let Err(error) =
                    send_email(backend.as_ref(), mailer.as_ref(), user_id, &kind, &template).await
                {
                    warn!(recipient = %user_id, template = template.name(), %error, "email not sent");
                }
            });
        }

        Ok(row)
    }

    /// Waits for every email still being sent. Call before the runtime shuts
    /// down, otherwise pending sends are cancelled.
    pub async fn flush(&self) {
        let mut emails =
            std::mem::take(&mut *self.emails.lock().unwrap_or_else(PoisonError::into_inner));
        let pending = emails.len();
        while let Some(result) = emails.join_next().await {
            if let Err(error) = result {
                warn!(%error, "email task did not finish");
            }
        }
        if pending > 0 {
            debug!(pending, "email queue flushed");
        }
    }
}

/// Looks up the recipient's address and preference, then sends. Returns
/// `Ok(false)` when the recipient opted out or has no profile.
pub async fn send_email(
    backend: &dyn Backend,
    mailer: &dyn Mailer,
    user_id: Uuid,
    kind: &str,
    template: &EmailTemplate,
) -> Result<bool> {
    if !backend.email_enabled(user_id, kind).await? {
        debug!(recipient = %user_id, kind, "email disabled by preference");
        return Ok(false);
    }

    let address = match backend.fetch_eit_profile(user_id).await? {
        Some(profile) => Some(profile.email),
        None => backend
            .fetch_supervisor_profile(user_id)
            .await?
            .map(|profile| profile.email),
    };
    let Some(address) = address else {
        return Ok(false);
    };

    mailer.send(&template.render(&address)).await?;
    Ok(true)
}

/// One identity's notification list, newest first.
pub struct NotificationCenter {
    backend: Arc<dyn Backend>,
    user_id: Uuid,
    items: Arc<RwLock<Vec<Notification>>>,
}

impl NotificationCenter {
    pub fn new(backend: Arc<dyn Backend>, user_id: Uuid) -> Self {
        Self {
            backend,
            user_id,
            items: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub async fn initialize(&self) -> Result<()> {
        reload(self.backend.as_ref(), self.user_id, &self.items).await
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.items.read().await.clone()
    }

    pub async fn unread_count(&self) -> usize {
        self.items.read().await.iter().filter(|n| !n.read).count()
    }

    /// Prepends inserted rows for this identity as they arrive. Reloads the
    /// whole list if the feed dropped changes.
    pub fn watch(&self, feed: &ChangeFeed) -> Subscription {
        let backend = Arc::clone(&self.backend);
        let items = Arc::clone(&self.items);
        let user_id = self.user_id;
        feed.subscribe(
            ChangeFilter::new(user_id, &["notifications"]).only(&[ChangeKind::Insert]),
            move |event| {
                let backend = Arc::clone(&backend);
                let items = Arc::clone(&items);
                async move {
                    let change = match event {
                        FeedEvent::Change(change) => change,
                        FeedEvent::Resync { .. } => {
                            if let Err(error) = reload(backend.as_ref(), user_id, &items).await {
                                warn!(identity = %user_id, %error, "notification resync failed");
                            }
                            return;
                        }
                    };
                    let notification: Notification = match serde_json::from_value(change.record) {
                        Ok(notification) => notification,
                        Err(e) => {
                            warn!(identity = %user_id, "discarding malformed notification: {e}");
                            return;
                        }
                    };
                    let mut items = items.write().await;
                    if !items.iter().any(|n| n.id == notification.id) {
                        items.insert(0, notification);
                    }
                }
            },
        )
    }

    pub async fn mark_as_read(&self, id: Uuid) -> Result<()> {
        self.backend
            .mark_notifications_read(self.user_id, &[id])
            .await?;

        if let Some(item) = self.items.write().await.iter_mut().find(|n| n.id == id) {
            item.read = true;
        }
        Ok(())
    }

    /// Marks the unread notifications currently held. Rows that arrive while
    /// the update is in flight are left unread. Returns how many were marked.
    pub async fn mark_all_as_read(&self) -> Result<usize> {
        let ids: Vec<Uuid> = self
            .items
            .read()
            .await
            .iter()
            .filter(|n| !n.read)
            .map(|n| n.id)
            .collect();

        if ids.is_empty() {
            return Ok(0);
        }

        self.backend.mark_notifications_read(self.user_id, &ids).await?;

        for item in self.items.write().await.iter_mut() {
            if ids.contains(&item.id) {
                item.read = true;
            }
        }
        Ok(ids.len())
    }
}

async fn reload(
    backend: &dyn Backend,
    user_id: Uuid,
    items: &RwLock<Vec<Notification>>,
) -> Result<()> {
    let mut fetched = backend.fetch_notifications(user_id).await?;
    fetched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    *items.write().await = fetched;
    Ok(())
}
