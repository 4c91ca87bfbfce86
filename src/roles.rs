use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::Result;
use crate::models::{Role, RoleKind, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Signup,
    EitHome,
    SupervisorHome,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Signup => "/signup",
            Route::EitHome => "/dashboard",
            Route::SupervisorHome => "/dashboard/supervisor",
        }
    }

    pub fn home(kind: RoleKind) -> Self {
        match kind {
            RoleKind::Eit => Route::EitHome,
            RoleKind::Supervisor => Route::SupervisorHome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Allow(Role),
    Redirect(Route),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { identity: Uuid },
    SignedOut { identity: Uuid },
}

/// Resolves an identity to its role once and keeps the answer until the
/// identity signs in or out again.
pub struct RoleResolver {
    backend: Arc<dyn Backend>,
    cache: RwLock<HashMap<Uuid, Role>>,
}

impl RoleResolver {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, identity: Uuid) -> Result<Option<Role>> {
        if let Some(role) = self.cache.read().await.get(&identity) {
            return Ok(Some(role.clone()));
        }

        let (eit, supervisor) = tokio::try_join!(
            self.backend.fetch_eit_profile(identity),
            self.backend.fetch_supervisor_profile(identity),
        )?;

        let role = match (eit, supervisor) {
            (Some(eit), Some(_)) => {
                warn!(%identity, "identity has both profiles, treating as EIT");
                Role::Eit(eit)
            }
            (Some(eit), None) => Role::Eit(eit),
            (None, Some(supervisor)) => Role::Supervisor(supervisor),
            // not cached so a finished signup is seen on the next lookup
            (None, None) => return Ok(None),
        };

        debug!(%identity, kind = ?role.kind(), "role resolved");
        self.cache.write().await.insert(identity, role.clone());
        Ok(Some(role))
    }

    pub async fn invalidate(&self, identity: Uuid) {
        self.cache.write().await.remove(&identity);
    }

    pub async fn guard(
        &self,
        session: Option<&Session>,
        required: Option<RoleKind>,
    ) -> Result<RouteDecision> {
        let Some(session) = session.filter(|session| !session.is_expired()) else {
            return Ok(RouteDecision::Redirect(Route::Login));
        };

        let Some(role) = self.resolve(session.identity_id).await? else {
            return Ok(RouteDecision::Redirect(Route::Signup));
        };

        match required {
            Some(kind) if kind != role.kind() => Ok(RouteDecision::Redirect(Route::home(role.kind()))),
            _ => Ok(RouteDecision::Allow(role)),
        }
    }

    pub async fn on_auth_event(&self, event: AuthEvent) -> Option<RouteDecision> {
        match event {
            AuthEvent::SignedIn { identity } => {
                self.invalidate(identity).await;
                None
            }
            AuthEvent::SignedOut { identity } => {
                self.invalidate(identity).await;
                Some(RouteDecision::Redirect(Route::Login))
            }
        }
    }
}
