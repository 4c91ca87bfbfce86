use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{Result, TrackError};
use crate::mailer::EmailTemplate;
use crate::models::{NewNotification, Relationship, RelationshipStatus};
use crate::notifications::Notifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Requested(Relationship),
    AlreadyPending(Relationship),
    AlreadyActive(Relationship),
    SupervisorNotFound,
    SupervisorAtCapacity { limit: i64 },
}

impl ConnectionOutcome {
    pub fn message(&self) -> String {
        match self {
            ConnectionOutcome::Requested(_) => "Connection request sent.".to_string(),
            ConnectionOutcome::AlreadyPending(_) => {
                "You already have a pending request with this supervisor.".to_string()
            }
            ConnectionOutcome::AlreadyActive(_) => {
                "You are already connected with this supervisor.".to_string()
            }
            ConnectionOutcome::SupervisorNotFound => {
                "No supervisor is registered with that email.".to_string()
            }
            ConnectionOutcome::SupervisorAtCapacity { limit } => format!(
                "This supervisor has reached their limit of {limit} active EITs."
            ),
        }
    }
}

/// EIT to supervisor request/accept/deny workflow.
pub struct RelationshipManager {
    backend: Arc<dyn Backend>,
    notifier: Arc<Notifier>,
    notify_on_deny: bool,
}

impl RelationshipManager {
    pub fn new(backend: Arc<dyn Backend>, notifier: Arc<Notifier>, notify_on_deny: bool) -> Self {
        Self {
            backend,
            notifier,
            notify_on_deny,
        }
    }

    pub async fn request_connection(
        &self,
        eit_id: Uuid,
        supervisor_email: &str,
    ) -> Result<ConnectionOutcome> {
        let eit = self
            .backend
            .fetch_eit_profile(eit_id)
            .await?
            .ok_or(TrackError::NotFound("EIT profile"))?;

        let Some(supervisor) = self.backend.find_supervisor_by_email(supervisor_email).await? else {
            return Ok(ConnectionOutcome::SupervisorNotFound);
        };

        if let Some(existing) = self.backend.find_relationship(eit_id, supervisor.id).await? {
            match existing.status {
                RelationshipStatus::Pending => return Ok(ConnectionOutcome::AlreadyPending(existing)),
                RelationshipStatus::Active => return Ok(ConnectionOutcome::AlreadyActive(existing)),
                RelationshipStatus::Completed | RelationshipStatus::Rejected => {}
            }
        }

        if let Some(limit) = self.over_capacity(supervisor.id).await? {
            return Ok(ConnectionOutcome::SupervisorAtCapacity { limit });
        }

        let relationship = self
            .backend
            .upsert_pending_relationship(eit_id, supervisor.id)
            .await?;
        info!(eit = %eit_id, supervisor = %supervisor.id, "connection requested");

        let notification = NewNotification {
            user_id: supervisor.id,
            kind: "connection_request".to_string(),
            title: "New connection request".to_string(),
            message: format!("{} would like you to be their supervisor.", eit.full_name),
            link: Some("/dashboard/supervisor/requests".to_string()),
        };
        let email = EmailTemplate::ConnectionRequested {
            eit_name: eit.full_name.clone(),
        };
        if let Err(error) = self.notifier.notify(notification, Some(email)).await {
            warn!(supervisor = %supervisor.id, %error, "connection request notification failed");
        }

        Ok(ConnectionOutcome::Requested(relationship))
    }

    /// Fails with [`TrackError::AtCapacity`] when the supervisor's plan has
    /// no free seat left.
    pub async fn accept(&self, supervisor_id: Uuid, relationship_id: Uuid) -> Result<Relationship> {
        if let Some(limit) = self.over_capacity(supervisor_id).await? {
            return Err(TrackError::AtCapacity { limit });
        }

        let relationship = self
            .transition(
                supervisor_id,
                relationship_id,
                RelationshipStatus::Pending,
                RelationshipStatus::Active,
            )
            .await?;

        let supervisor_name = self.supervisor_name(supervisor_id).await;
        let notification = NewNotification {
            user_id: relationship.eit_id,
            kind: "connection_accepted".to_string(),
            title: "Connection accepted".to_string(),
            message: format!("{supervisor_name} is now your supervisor."),
            link: Some("/dashboard".to_string()),
        };
        if let Err(error) = self
            .notifier
            .notify(notification, Some(EmailTemplate::ConnectionAccepted { supervisor_name }))
            .await
        {
            warn!(eit = %relationship.eit_id, %error, "acceptance notification failed");
        }

        Ok(relationship)
    }

    pub async fn deny(&self, supervisor_id: Uuid, relationship_id: Uuid) -> Result<Relationship> {
        let relationship = self
            .transition(
                supervisor_id,
                relationship_id,
                RelationshipStatus::Pending,
                RelationshipStatus::Rejected,
            )
            .await?;

        if self.notify_on_deny {
            let supervisor_name = self.supervisor_name(supervisor_id).await;
            let notification = NewNotification {
                user_id: relationship.eit_id,
                kind: "connection_denied".to_string(),
                title: "Connection declined".to_string(),
                message: format!("{supervisor_name} declined your connection request."),
                link: Some("/dashboard/settings".to_string()),
            };
            if let Err(error) = self
                .notifier
                .notify(notification, Some(EmailTemplate::ConnectionDenied { supervisor_name }))
                .await
            {
                warn!(eit = %relationship.eit_id, %error, "denial notification failed");
            }
        }

        Ok(relationship)
    }

    pub async fn complete(&self, supervisor_id: Uuid, relationship_id: Uuid) -> Result<Relationship> {
        self.transition(
            supervisor_id,
            relationship_id,
            RelationshipStatus::Active,
            RelationshipStatus::Completed,
        )
        .await
    }

    pub async fn for_supervisor(&self, supervisor_id: Uuid) -> Result<Vec<Relationship>> {
        self.backend.relationships_for_supervisor(supervisor_id).await
    }

    pub async fn for_eit(&self, eit_id: Uuid) -> Result<Vec<Relationship>> {
        self.backend.relationships_for_eit(eit_id).await
    }

    async fn transition(
        &self,
        supervisor_id: Uuid,
        relationship_id: Uuid,
        from: RelationshipStatus,
        to: RelationshipStatus,
    ) -> Result<Relationship> {
        let relationship = self
            .backend
            .fetch_relationship(relationship_id)
            .await?
            .filter(|relationship| relationship.supervisor_id == supervisor_id)
            .ok_or(TrackError::NotFound("relationship"))?;

        if relationship.status != from {
            return Err(TrackError::InvalidTransition {
                from: relationship.status,
                to,
            });
        }

        // another writer may have answered since the read above
        let Some(updated) = self
            .backend
            .update_relationship_status(relationship_id, from, to)
            .await?
        else {
            let current = self
                .backend
                .fetch_relationship(relationship_id)
                .await?
                .ok_or(TrackError::NotFound("relationship"))?;
            return Err(TrackError::InvalidTransition {
                from: current.status,
                to,
            });
        };
        info!(relationship = %relationship_id, %from, %to, "relationship updated");
        Ok(updated)
    }

    /// The seat limit when the supervisor has none left, otherwise `None`.
    async fn over_capacity(&self, supervisor_id: Uuid) -> Result<Option<i64>> {
        let tier = self
            .backend
            .fetch_subscription(supervisor_id)
            .await?
            .map(|subscription| subscription.effective_tier())
            .unwrap_or_default();

        let Some(limit) = tier.supervisor_limit() else {
            return Ok(None);
        };
        let active = self.backend.count_active_eits(supervisor_id).await?;
        if active >= limit {
            info!(supervisor = %supervisor_id, active, limit, "supervisor at capacity");
            return Ok(Some(limit));
        }
        Ok(None)
    }

    async fn supervisor_name(&self, supervisor_id: Uuid) -> String {
        match self.backend.fetch_supervisor_profile(supervisor_id).await {
            Ok(Some(profile)) => profile.full_name,
            _ => "Your supervisor".to_string(),
        }
    }
}
