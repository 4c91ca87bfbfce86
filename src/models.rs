use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EitProfile {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorProfile {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Eit,
    Supervisor,
}

/// Resolved identity of a signed-in user. An identity has a row in exactly
/// one of the two profile tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Role {
    Eit(EitProfile),
    Supervisor(SupervisorProfile),
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Eit(_) => RoleKind::Eit,
            Role::Supervisor(_) => RoleKind::Supervisor,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Role::Eit(profile) => profile.id,
            Role::Supervisor(profile) => profile.id,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            Role::Eit(profile) => &profile.email,
            Role::Supervisor(profile) => &profile.email,
        }
    }
}

/// Session handed over by the external auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity_id: Uuid,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: Uuid,
    pub category_id: i32,
    pub code: String,
    pub name: String,
    pub rank: Option<u8>,
}

impl Skill {
    pub fn is_completed(&self) -> bool {
        self.rank.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCategory {
    pub id: i32,
    pub name: String,
    pub skills: Vec<Skill>,
}

impl SkillCategory {
    pub fn completed(&self) -> usize {
        self.skills.iter().filter(|skill| skill.is_completed()).count()
    }

    pub fn total(&self) -> usize {
        self.skills.len()
    }

    /// `None` for an empty category.
    pub fn percentage(&self) -> Option<u8> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some(((self.completed() as f64 / total as f64) * 100.0).round() as u8)
    }
}

/// Flat row as returned by the skills query, one per skill.
#[derive(Debug, Clone)]
pub struct SkillRow {
    pub category_id: i32,
    pub category_name: String,
    pub skill_id: Uuid,
    pub code: String,
    pub name: String,
    pub rank: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipStatus {
    Pending,
    Active,
    Completed,
    Rejected,
}

impl RelationshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipStatus::Pending => "pending",
            RelationshipStatus::Active => "active",
            RelationshipStatus::Completed => "completed",
            RelationshipStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RelationshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(RelationshipStatus::Pending),
            "active" => Ok(RelationshipStatus::Active),
            "completed" => Ok(RelationshipStatus::Completed),
            "rejected" => Ok(RelationshipStatus::Rejected),
            other => Err(format!("unknown relationship status {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Uuid,
    pub eit_id: Uuid,
    pub supervisor_id: Uuid,
    pub status: RelationshipStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    /// Maximum number of active EITs a supervisor on this tier may hold.
    /// `None` means unlimited.
    pub fn supervisor_limit(&self) -> Option<i64> {
        match self {
            Tier::Free => Some(1),
            Tier::Pro => Some(10),
            Tier::Enterprise => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!("unknown tier {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: Uuid,
    pub tier: Tier,
    pub status: String,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn free(user_id: Uuid) -> Self {
        Self {
            user_id,
            tier: Tier::Free,
            status: "active".to_string(),
            current_period_end: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    /// Tier that currently applies. A lapsed or cancelled plan counts as free.
    pub fn effective_tier(&self) -> Tier {
        if self.is_active() {
            self.tier
        } else {
            Tier::Free
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounts {
    pub completed_skills: usize,
    pub documented_experiences: i64,
    pub supervisor_approvals: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub overall_progress: u8,
    pub completed_skills: usize,
    pub documented_experiences: i64,
    pub supervisor_approvals: i64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sao {
    pub id: Uuid,
    pub eit_id: Uuid,
    pub title: String,
    pub situation: String,
    pub action: String,
    pub outcome: String,
    pub skill_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Sao {
    pub fn narrative(&self) -> String {
        [&self.situation, &self.action, &self.outcome]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| part.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub id: Uuid,
    pub eit_id: Uuid,
    pub skill_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub organization: Option<String>,
}
