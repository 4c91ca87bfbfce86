use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{Result, TrackError};
use crate::mailer::{EmailMessage, Mailer};
use crate::models::{
    EitProfile, NewNotification, Notification, ProfileUpdate, Relationship, RelationshipStatus,
    Sao, SkillRow, Subscription, SupervisorProfile, Tier, Validator,
};
use crate::skills::SKILL_CATALOG;

#[derive(Default)]
struct State {
    eits: HashMap<Uuid, EitProfile>,
    supervisors: HashMap<Uuid, SupervisorProfile>,
    skills: Vec<SkillRow>,
    ranks: HashMap<(Uuid, Uuid), u8>,
    experiences: HashMap<Uuid, (i64, i64)>,
    saos: Vec<Sao>,
    validators: Vec<Validator>,
    notifications: Vec<Notification>,
    email_opt_outs: HashSet<(Uuid, String)>,
    relationships: Vec<Relationship>,
    subscriptions: HashMap<Uuid, Subscription>,
    terms: Vec<(Uuid, String)>,
    calls: HashMap<&'static str, usize>,
    failing: HashSet<&'static str>,
    delays: HashMap<&'static str, Duration>,
}

/// In-memory table surface with call counting and failure injection.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog() -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.lock().unwrap();
            for (index, (category_name, skills)) in SKILL_CATALOG.iter().enumerate() {
                for (code, name) in skills.iter() {
                    state.skills.push(SkillRow {
                        category_id: index as i32 + 1,
                        category_name: category_name.to_string(),
                        skill_id: Uuid::new_v4(),
                        code: code.to_string(),
                        name: name.to_string(),
                        rank: None,
                    });
                }
            }
        }
        backend
    }

    pub fn add_eit(&self, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().eits.insert(
            id,
            EitProfile {
                id,
                full_name: format!("EIT {email}"),
                email: email.to_string(),
                start_date: None,
                target_date: None,
            },
        );
        id
    }

    pub fn add_supervisor(&self, email: &str, tier: Option<Tier>) -> Uuid {
        let id = Uuid::new_v4();
        let mut state = self.state.lock().unwrap();
        state.supervisors.insert(
            id,
            SupervisorProfile {
                id,
                full_name: format!("Supervisor {email}"),
                email: email.to_string(),
                organization: None,
            },
        );
        if let Some(tier) = tier {
            state.subscriptions.insert(
                id,
                Subscription {
                    tier,
                    ..Subscription::free(id)
                },
            );
        }
        id
    }

    pub fn add_relationship(&self, eit_id: Uuid, supervisor_id: Uuid, status: RelationshipStatus) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.state.lock().unwrap().relationships.push(Relationship {
            id,
            eit_id,
            supervisor_id,
            status,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn rank_first(&self, eit_id: Uuid, count: usize) {
        let mut state = self.state.lock().unwrap();
        let skill_ids: Vec<Uuid> = state.skills.iter().take(count).map(|s| s.skill_id).collect();
        for skill_id in skill_ids {
            state.ranks.insert((eit_id, skill_id), 3);
        }
    }

    pub fn set_experiences(&self, eit_id: Uuid, documented: i64, approved: i64) {
        self.state
            .lock()
            .unwrap()
            .experiences
            .insert(eit_id, (documented, approved));
    }

    pub fn add_sao(&self, eit_id: Uuid, title: &str, skill_codes: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let skill_ids = state
            .skills
            .iter()
            .filter(|s| skill_codes.contains(&s.code.as_str()))
            .map(|s| s.skill_id)
            .collect();
        state.saos.push(Sao {
            id: Uuid::new_v4(),
            eit_id,
            title: title.to_string(),
            situation: format!("{title} situation"),
            action: format!("{title} action"),
            outcome: format!("{title} outcome"),
            skill_ids,
            created_at: Utc::now(),
        });
    }

    pub fn add_validator(&self, eit_id: Uuid, skill_code: &str, full_name: &str) {
        let mut state = self.state.lock().unwrap();
        let skill_id = state
            .skills
            .iter()
            .find(|s| s.code == skill_code)
            .map(|s| s.skill_id)
            .unwrap();
        state.validators.push(Validator {
            id: Uuid::new_v4(),
            eit_id,
            skill_id,
            full_name: full_name.to_string(),
            email: format!("{}@example.com", full_name.to_lowercase().replace(' ', ".")),
            status: "validated".to_string(),
        });
    }

    pub fn opt_out_of_email(&self, user_id: Uuid, kind: &str) {
        self.state
            .lock()
            .unwrap()
            .email_opt_outs
            .insert((user_id, kind.to_string()));
    }

    pub fn notifications_for(&self, user_id: Uuid) -> Vec<Notification> {
        self.state
            .lock()
            .unwrap()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.state.lock().unwrap().relationships.clone()
    }

    pub fn terms_for(&self, user_id: Uuid) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .terms
            .iter()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, version)| version.clone())
            .collect()
    }

    pub fn set_subscription_status(&self, user_id: Uuid, status: &str) {
        if let Some(subscription) = self.state.lock().unwrap().subscriptions.get_mut(&user_id) {
            subscription.status = status.to_string();
        }
    }

    pub fn calls(&self, name: &str) -> usize {
        self.state.lock().unwrap().calls.get(name).copied().unwrap_or(0)
    }

    pub fn fail_next(&self, name: &'static str) {
        self.state.lock().unwrap().failing.insert(name);
    }

    pub fn delay(&self, name: &'static str, duration: Duration) {
        self.state.lock().unwrap().delays.insert(name, duration);
    }

    async fn enter(&self, name: &'static str) -> Result<()> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(name).or_insert(0) += 1;
            if state.failing.remove(name) {
                return Err(TrackError::Database(sqlx::Error::PoolTimedOut));
            }
            state.delays.get(name).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch_eit_profile(&self, id: Uuid) -> Result<Option<EitProfile>> {
        self.enter("fetch_eit_profile").await?;
        Ok(self.state.lock().unwrap().eits.get(&id).cloned())
    }

    async fn fetch_supervisor_profile(&self, id: Uuid) -> Result<Option<SupervisorProfile>> {
        self.enter("fetch_supervisor_profile").await?;
        Ok(self.state.lock().unwrap().supervisors.get(&id).cloned())
    }

    async fn find_eit_by_email(&self, email: &str) -> Result<Option<EitProfile>> {
        self.enter("find_eit_by_email").await?;
        let state = self.state.lock().unwrap();
        Ok(state.eits.values().find(|p| p.email == email).cloned())
    }

    async fn find_supervisor_by_email(&self, email: &str) -> Result<Option<SupervisorProfile>> {
        self.enter("find_supervisor_by_email").await?;
        let state = self.state.lock().unwrap();
        Ok(state.supervisors.values().find(|p| p.email == email).cloned())
    }

    async fn insert_eit_profile(&self, profile: &EitProfile) -> Result<()> {
        self.enter("insert_eit_profile").await?;
        self.state.lock().unwrap().eits.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn insert_supervisor_profile(&self, profile: &SupervisorProfile) -> Result<()> {
        self.enter("insert_supervisor_profile").await?;
        self.state
            .lock()
            .unwrap()
            .supervisors
            .insert(profile.id, profile.clone());
        Ok(())
    }

    async fn update_eit_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<()> {
        self.enter("update_eit_profile").await?;
        let mut state = self.state.lock().unwrap();
        let profile = state.eits.get_mut(&id).ok_or(TrackError::NotFound("profile"))?;
        if let Some(name) = &update.full_name {
            profile.full_name = name.clone();
        }
        Ok(())
    }

    async fn update_supervisor_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<()> {
        self.enter("update_supervisor_profile").await?;
        let mut state = self.state.lock().unwrap();
        let profile = state
            .supervisors
            .get_mut(&id)
            .ok_or(TrackError::NotFound("profile"))?;
        if let Some(name) = &update.full_name {
            profile.full_name = name.clone();
        }
        if let Some(organization) = &update.organization {
            profile.organization = Some(organization.clone());
        }
        Ok(())
    }

    async fn update_timeline(
        &self,
        eit_id: Uuid,
        start_date: Option<NaiveDate>,
        target_date: Option<NaiveDate>,
    ) -> Result<()> {
        self.enter("update_timeline").await?;
        let mut state = self.state.lock().unwrap();
        let profile = state.eits.get_mut(&eit_id).ok_or(TrackError::NotFound("profile"))?;
        profile.start_date = start_date;
        profile.target_date = target_date;
        Ok(())
    }

    async fn record_terms_acceptance(&self, user_id: Uuid, version: &str) -> Result<()> {
        self.enter("record_terms_acceptance").await?;
        self.state
            .lock()
            .unwrap()
            .terms
            .push((user_id, version.to_string()));
        Ok(())
    }

    async fn delete_account(&self, user_id: Uuid) -> Result<()> {
        self.enter("delete_account").await?;
        let mut state = self.state.lock().unwrap();
        state.eits.remove(&user_id);
        state.supervisors.remove(&user_id);
        state.subscriptions.remove(&user_id);
        state.notifications.retain(|n| n.user_id != user_id);
        state
            .relationships
            .retain(|r| r.eit_id != user_id && r.supervisor_id != user_id);
        Ok(())
    }

    async fn fetch_user_skills(&self, eit_id: Uuid) -> Result<Vec<SkillRow>> {
        self.enter("fetch_user_skills").await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .skills
            .iter()
            .map(|row| SkillRow {
                rank: state.ranks.get(&(eit_id, row.skill_id)).map(|rank| *rank as i16),
                ..row.clone()
            })
            .collect())
    }

    async fn set_skill_rank(&self, eit_id: Uuid, skill_id: Uuid, rank: u8) -> Result<()> {
        self.enter("set_skill_rank").await?;
        self.state.lock().unwrap().ranks.insert((eit_id, skill_id), rank);
        Ok(())
    }

    async fn count_documented_experiences(&self, eit_id: Uuid) -> Result<i64> {
        self.enter("count_documented_experiences").await?;
        let state = self.state.lock().unwrap();
        Ok(state.experiences.get(&eit_id).map_or(0, |(documented, _)| *documented))
    }

    async fn count_supervisor_approvals(&self, eit_id: Uuid) -> Result<i64> {
        self.enter("count_supervisor_approvals").await?;
        let state = self.state.lock().unwrap();
        Ok(state.experiences.get(&eit_id).map_or(0, |(_, approved)| *approved))
    }

    async fn fetch_saos(&self, eit_id: Uuid) -> Result<Vec<Sao>> {
        self.enter("fetch_saos").await?;
        let state = self.state.lock().unwrap();
        Ok(state.saos.iter().filter(|s| s.eit_id == eit_id).cloned().collect())
    }

    async fn fetch_validators(&self, eit_id: Uuid) -> Result<Vec<Validator>> {
        self.enter("fetch_validators").await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .validators
            .iter()
            .filter(|v| v.eit_id == eit_id)
            .cloned()
            .collect())
    }

    async fn fetch_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.enter("fetch_notifications").await?;
        let state = self.state.lock().unwrap();
        let mut notifications: Vec<Notification> = state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn insert_notification(&self, notification: &NewNotification) -> Result<Notification> {
        self.enter("insert_notification").await?;
        let mut state = self.state.lock().unwrap();
        // keep creation times strictly increasing so ordering is stable
        let created_at = state
            .notifications
            .iter()
            .map(|n| n.created_at)
            .max()
            .map_or_else(Utc::now, |latest| {
                (latest + chrono::Duration::milliseconds(1)).max(Utc::now())
            });
        let row = Notification {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            kind: notification.kind.clone(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            link: notification.link.clone(),
            read: false,
            created_at,
        };
        state.notifications.push(row.clone());
        Ok(row)
    }

    async fn mark_notifications_read(&self, user_id: Uuid, ids: &[Uuid]) -> Result<()> {
        self.enter("mark_notifications_read").await?;
        let mut state = self.state.lock().unwrap();
        for notification in state.notifications.iter_mut() {
            if notification.user_id == user_id && ids.contains(&notification.id) {
                notification.read = true;
            }
        }
        Ok(())
    }

    async fn email_enabled(&self, user_id: Uuid, kind: &str) -> Result<bool> {
        self.enter("email_enabled").await?;
        let state = self.state.lock().unwrap();
        Ok(!state.email_opt_outs.contains(&(user_id, kind.to_string())))
    }

    async fn find_relationship(
        &self,
        eit_id: Uuid,
        supervisor_id: Uuid,
    ) -> Result<Option<Relationship>> {
        self.enter("find_relationship").await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .relationships
            .iter()
            .find(|r| r.eit_id == eit_id && r.supervisor_id == supervisor_id)
            .cloned())
    }

    async fn fetch_relationship(&self, id: Uuid) -> Result<Option<Relationship>> {
        self.enter("fetch_relationship").await?;
        let state = self.state.lock().unwrap();
        Ok(state.relationships.iter().find(|r| r.id == id).cloned())
    }

    async fn count_active_eits(&self, supervisor_id: Uuid) -> Result<i64> {
        self.enter("count_active_eits").await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .relationships
            .iter()
            .filter(|r| r.supervisor_id == supervisor_id && r.status == RelationshipStatus::Active)
            .count() as i64)
    }

    async fn fetch_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        self.enter("fetch_subscription").await?;
        Ok(self.state.lock().unwrap().subscriptions.get(&user_id).cloned())
    }

    async fn upsert_pending_relationship(
        &self,
        eit_id: Uuid,
        supervisor_id: Uuid,
    ) -> Result<Relationship> {
        self.enter("upsert_pending_relationship").await?;
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        if let Some(existing) = state
            .relationships
            .iter_mut()
            .find(|r| r.eit_id == eit_id && r.supervisor_id == supervisor_id)
        {
            existing.status = RelationshipStatus::Pending;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let relationship = Relationship {
            id: Uuid::new_v4(),
            eit_id,
            supervisor_id,
            status: RelationshipStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.relationships.push(relationship.clone());
        Ok(relationship)
    }

    async fn update_relationship_status(
        &self,
        id: Uuid,
        from: RelationshipStatus,
        to: RelationshipStatus,
    ) -> Result<Option<Relationship>> {
        self.enter("update_relationship_status").await?;
        let mut state = self.state.lock().unwrap();
        let Some(relationship) = state
            .relationships
            .iter_mut()
            .find(|r| r.id == id && r.status == from)
        else {
            return Ok(None);
        };
        relationship.status = to;
        relationship.updated_at = Utc::now();
        Ok(Some(relationship.clone()))
    }

    async fn relationships_for_supervisor(&self, supervisor_id: Uuid) -> Result<Vec<Relationship>> {
        self.enter("relationships_for_supervisor").await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .relationships
            .iter()
            .filter(|r| r.supervisor_id == supervisor_id)
            .cloned()
            .collect())
    }

    async fn relationships_for_eit(&self, eit_id: Uuid) -> Result<Vec<Relationship>> {
        self.enter("relationships_for_eit").await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .relationships
            .iter()
            .filter(|r| r.eit_id == eit_id)
            .cloned()
            .collect())
    }
}

/// Mailer that keeps every message, optionally failing every send.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Polls until `count` messages were attempted or a second passes.
    pub async fn wait_for(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..200 {
            if self.sent.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        if self.fail {
            return Err(TrackError::Mail("smtp unavailable".to_string()));
        }
        Ok(())
    }
}
