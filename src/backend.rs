use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    EitProfile, NewNotification, Notification, ProfileUpdate, Relationship, RelationshipStatus,
    Sao, SkillRow, Subscription, SupervisorProfile, Validator,
};

/// Table surface the services talk to. `db::PgBackend` is the production
/// implementation.
#[async_trait]
pub trait Backend: Send + Sync {
    // profiles

    async fn fetch_eit_profile(&self, id: Uuid) -> Result<Option<EitProfile>>;

    async fn fetch_supervisor_profile(&self, id: Uuid) -> Result<Option<SupervisorProfile>>;

    async fn find_eit_by_email(&self, email: &str) -> Result<Option<EitProfile>>;

    async fn find_supervisor_by_email(&self, email: &str) -> Result<Option<SupervisorProfile>>;

    async fn insert_eit_profile(&self, profile: &EitProfile) -> Result<()>;

    async fn insert_supervisor_profile(&self, profile: &SupervisorProfile) -> Result<()>;

    async fn update_eit_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<()>;

    async fn update_supervisor_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<()>;

    async fn update_timeline(
        &self,
        eit_id: Uuid,
        start_date: Option<NaiveDate>,
        target_date: Option<NaiveDate>,
    ) -> Result<()>;

    async fn record_terms_acceptance(&self, user_id: Uuid, version: &str) -> Result<()>;

    async fn delete_account(&self, user_id: Uuid) -> Result<()>;

    // skills and progress

    async fn fetch_user_skills(&self, eit_id: Uuid) -> Result<Vec<SkillRow>>;

    async fn set_skill_rank(&self, eit_id: Uuid, skill_id: Uuid, rank: u8) -> Result<()>;

    async fn count_documented_experiences(&self, eit_id: Uuid) -> Result<i64>;

    async fn count_supervisor_approvals(&self, eit_id: Uuid) -> Result<i64>;

    async fn fetch_saos(&self, eit_id: Uuid) -> Result<Vec<Sao>>;

    async fn fetch_validators(&self, eit_id: Uuid) -> Result<Vec<Validator>>;

    // notifications

    async fn fetch_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>>;

    async fn insert_notification(&self, notification: &NewNotification) -> Result<Notification>;

    async fn mark_notifications_read(&self, user_id: Uuid, ids: &[Uuid]) -> Result<()>;

    async fn email_enabled(&self, user_id: Uuid, kind: &str) -> Result<bool>;

    // relationships

    async fn find_relationship(
        &self,
        eit_id: Uuid,
        supervisor_id: Uuid,
    ) -> Result<Option<Relationship>>;

    async fn fetch_relationship(&self, id: Uuid) -> Result<Option<Relationship>>;

    async fn count_active_eits(&self, supervisor_id: Uuid) -> Result<i64>;

    async fn fetch_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>>;

    async fn upsert_pending_relationship(
        &self,
        eit_id: Uuid,
        supervisor_id: Uuid,
    ) -> Result<Relationship>;

    /// Moves the row from `from` to `to`. `None` when the row is no longer
    /// in `from`.
    async fn update_relationship_status(
        &self,
        id: Uuid,
        from: RelationshipStatus,
        to: RelationshipStatus,
    ) -> Result<Option<Relationship>>;

    async fn relationships_for_supervisor(&self, supervisor_id: Uuid) -> Result<Vec<Relationship>>;

    async fn relationships_for_eit(&self, eit_id: Uuid) -> Result<Vec<Relationship>>;
}
