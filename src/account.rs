use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{Result, TrackError};
use crate::models::{EitProfile, ProfileUpdate, Role, RoleKind, Subscription, SupervisorProfile};
use crate::roles::RoleResolver;

pub const DELETE_CONFIRMATION: &str = "DELETE";

#[derive(Debug, Clone, Copy)]
pub struct PasswordPolicy {
    pub min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 8 }
    }
}

impl PasswordPolicy {
    pub fn validate(&self, password: &str, confirmation: &str) -> Result<()> {
        if password.chars().count() < self.min_length {
            return Err(TrackError::validation(format!(
                "Password must be at least {} characters",
                self.min_length
            )));
        }
        if !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(TrackError::validation(
                "Password must contain an uppercase letter",
            ));
        }
        if !password.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(TrackError::validation(
                "Password must contain a lowercase letter",
            ));
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(TrackError::validation("Password must contain a number"));
        }
        if password != confirmation {
            return Err(TrackError::validation("Passwords do not match"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub full_name: String,
    pub email: String,
    pub role: RoleKind,
    pub organization: Option<String>,
    pub terms_version: String,
}

fn required(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TrackError::validation(format!("{field} is required")));
    }
    Ok(())
}

/// Profile, timeline, subscription and danger-zone operations.
pub struct AccountService {
    backend: Arc<dyn Backend>,
    roles: Arc<RoleResolver>,
}

impl AccountService {
    pub fn new(backend: Arc<dyn Backend>, roles: Arc<RoleResolver>) -> Self {
        Self { backend, roles }
    }

    /// Creates the profile row for an identity the auth provider already
    /// issued. Recording terms acceptance is best-effort.
    pub async fn register(&self, identity: Uuid, registration: Registration) -> Result<Role> {
        required(&registration.full_name, "Full name")?;
        required(&registration.email, "Email")?;
        if !registration.email.contains('@') {
            return Err(TrackError::validation("Email address is not valid"));
        }

        let role = match registration.role {
            RoleKind::Eit => {
                let profile = EitProfile {
                    id: identity,
                    full_name: registration.full_name.trim().to_string(),
                    email: registration.email.trim().to_string(),
                    start_date: None,
                    target_date: None,
                };
                self.backend.insert_eit_profile(&profile).await?;
                Role::Eit(profile)
            }
            RoleKind::Supervisor => {
                let profile = SupervisorProfile {
                    id: identity,
                    full_name: registration.full_name.trim().to_string(),
                    email: registration.email.trim().to_string(),
                    organization: registration.organization.clone(),
                };
                self.backend.insert_supervisor_profile(&profile).await?;
                Role::Supervisor(profile)
            }
        };

        if let Err(error) = self
            .backend
            .record_terms_acceptance(identity, &registration.terms_version)
            .await
        {
            warn!(%identity, %error, "terms acceptance not recorded");
        }

        self.roles.invalidate(identity).await;
        info!(%identity, kind = ?role.kind(), "profile registered");
        Ok(role)
    }

    pub async fn update_profile(&self, identity: Uuid, update: ProfileUpdate) -> Result<()> {
        if let Some(name) = &update.full_name {
            required(name, "Full name")?;
        }

        let role = self
            .roles
            .resolve(identity)
            .await?
            .ok_or(TrackError::NotFound("profile"))?;

        match role.kind() {
            RoleKind::Eit => self.backend.update_eit_profile(identity, &update).await?,
            RoleKind::Supervisor => {
                self.backend
                    .update_supervisor_profile(identity, &update)
                    .await?
            }
        }

        self.roles.invalidate(identity).await;
        Ok(())
    }

    pub async fn update_timeline(
        &self,
        eit_id: Uuid,
        start_date: Option<NaiveDate>,
        target_date: Option<NaiveDate>,
    ) -> Result<()> {
        if let (Some(start), Some(target)) = (start_date, target_date) {
            if start > target {
                return Err(TrackError::validation(
                    "Target date must be after the start date",
                ));
            }
        }

        self.backend
            .update_timeline(eit_id, start_date, target_date)
            .await?;
        self.roles.invalidate(eit_id).await;
        Ok(())
    }

    /// Identities without a subscription row are on the free tier.
    pub async fn subscription(&self, identity: Uuid) -> Result<Subscription> {
        Ok(self
            .backend
            .fetch_subscription(identity)
            .await?
            .unwrap_or_else(|| Subscription::free(identity)))
    }

    pub async fn delete_account(&self, identity: Uuid, confirmation: &str) -> Result<()> {
        if confirmation != DELETE_CONFIRMATION {
            return Err(TrackError::validation(format!(
                "Type {DELETE_CONFIRMATION} to confirm"
            )));
        }

        self.backend.delete_account(identity).await?;
        self.roles.invalidate(identity).await;
        warn!(%identity, "account deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;
    use crate::testing::MemoryBackend;

    fn service(backend: &Arc<MemoryBackend>) -> AccountService {
        AccountService::new(backend.clone(), Arc::new(RoleResolver::new(backend.clone())))
    }

    fn registration(role: RoleKind) -> Registration {
        Registration {
            full_name: "Avery Lee".to_string(),
            email: "avery@example.com".to_string(),
            role,
            organization: None,
            terms_version: "2024-01".to_string(),
        }
    }

    #[test]
    fn password_policy_checks_in_order() {
        let policy = PasswordPolicy::default();
        let message = |password: &str, confirm: &str| {
            policy
                .validate(password, confirm)
                .map_err(|e| e.user_message())
                .err()
        };

        assert_eq!(
            message("Ab1", "Ab1").as_deref(),
            Some("Password must be at least 8 characters")
        );
        assert_eq!(
            message("abcdefg1", "abcdefg1").as_deref(),
            Some("Password must contain an uppercase letter")
        );
        assert_eq!(
            message("ABCDEFG1", "ABCDEFG1").as_deref(),
            Some("Password must contain a lowercase letter")
        );
        assert_eq!(
            message("Abcdefgh", "Abcdefgh").as_deref(),
            Some("Password must contain a number")
        );
        assert_eq!(
            message("Abcdefg1", "Abcdefg2").as_deref(),
            Some("Passwords do not match")
        );
        assert_eq!(message("Abcdefg1", "Abcdefg1"), None);
    }

    #[tokio::test]
    async fn register_survives_terms_failure() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_next("record_terms_acceptance");
        let identity = Uuid::new_v4();

        let role = service(&backend)
            .register(identity, registration(RoleKind::Supervisor))
            .await
            .unwrap();

        assert_eq!(role.kind(), RoleKind::Supervisor);
        assert!(backend.terms_for(identity).is_empty());
    }

    #[tokio::test]
    async fn register_validates_before_writing() {
        let backend = Arc::new(MemoryBackend::new());
        let mut blank = registration(RoleKind::Eit);
        blank.full_name = "  ".to_string();

        let error = service(&backend)
            .register(Uuid::new_v4(), blank)
            .await
            .unwrap_err();
        assert!(matches!(error, TrackError::Validation(_)));
        assert_eq!(backend.calls("insert_eit_profile"), 0);
    }

    #[tokio::test]
    async fn timeline_rejects_inverted_dates() {
        let backend = Arc::new(MemoryBackend::new());
        let eit = backend.add_eit("avery@example.com");
        let start = NaiveDate::from_ymd_opt(2026, 5, 1);
        let target = NaiveDate::from_ymd_opt(2025, 5, 1);

        let error = service(&backend)
            .update_timeline(eit, start, target)
            .await
            .unwrap_err();
        assert!(matches!(error, TrackError::Validation(_)));

        service(&backend)
            .update_timeline(eit, target, start)
            .await
            .unwrap();
        let profile = backend.fetch_eit_profile(eit).await.unwrap().unwrap();
        assert_eq!(profile.target_date, start);
    }

    #[tokio::test]
    async fn update_profile_routes_by_role() {
        let backend = Arc::new(MemoryBackend::new());
        let supervisor = backend.add_supervisor("jules@example.com", None);

        service(&backend)
            .update_profile(
                supervisor,
                ProfileUpdate {
                    full_name: None,
                    organization: Some("Moreno Structural".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(backend.calls("update_supervisor_profile"), 1);
        assert_eq!(backend.calls("update_eit_profile"), 0);
    }

    #[tokio::test]
    async fn missing_subscription_defaults_to_free() {
        let backend = Arc::new(MemoryBackend::new());
        let eit = backend.add_eit("avery@example.com");
        let subscription = service(&backend).subscription(eit).await.unwrap();
        assert_eq!(subscription.tier, Tier::Free);
    }

    #[tokio::test]
    async fn delete_requires_confirmation() {
        let backend = Arc::new(MemoryBackend::new());
        let eit = backend.add_eit("avery@example.com");
        let accounts = service(&backend);

        assert!(accounts.delete_account(eit, "delete").await.is_err());
        assert_eq!(backend.calls("delete_account"), 0);

        accounts.delete_account(eit, DELETE_CONFIRMATION).await.unwrap();
        assert!(backend.fetch_eit_profile(eit).await.unwrap().is_none());
    }
}
