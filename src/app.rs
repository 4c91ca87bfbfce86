use std::sync::Arc;

use crate::account::AccountService;
use crate::backend::Backend;
use crate::mailer::Mailer;
use crate::notifications::{NotificationCenter, Notifier};
use crate::progress::ProgressAggregator;
use crate::realtime::ChangeFeed;
use crate::relationships::RelationshipManager;
use crate::roles::{AuthEvent, RoleResolver, RouteDecision};
use crate::skills::SkillsStore;

/// Every service wired to one backend.
pub struct App {
    pub backend: Arc<dyn Backend>,
    pub feed: Arc<ChangeFeed>,
    pub roles: Arc<RoleResolver>,
    pub skills: Arc<SkillsStore>,
    pub progress: Arc<ProgressAggregator>,
    pub notifier: Arc<Notifier>,
    pub relationships: RelationshipManager,
    pub accounts: AccountService,
}

impl App {
    pub fn new(backend: Arc<dyn Backend>, mailer: Arc<dyn Mailer>, notify_on_deny: bool) -> Self {
        let roles = Arc::new(RoleResolver::new(Arc::clone(&backend)));
        let skills = Arc::new(SkillsStore::new(Arc::clone(&backend)));
        let progress = Arc::new(ProgressAggregator::new(
            Arc::clone(&backend),
            Arc::clone(&skills),
        ));
        let notifier = Arc::new(Notifier::new(Arc::clone(&backend), mailer));
        let relationships =
            RelationshipManager::new(Arc::clone(&backend), Arc::clone(&notifier), notify_on_deny);
        let accounts = AccountService::new(Arc::clone(&backend), Arc::clone(&roles));

        Self {
            backend,
            feed: Arc::new(ChangeFeed::new()),
            roles,
            skills,
            progress,
            notifier,
            relationships,
            accounts,
        }
    }

    pub fn notification_center(&self, user_id: uuid::Uuid) -> NotificationCenter {
        NotificationCenter::new(Arc::clone(&self.backend), user_id)
    }

    /// Forwards the event to the role cache. Signing out also drops the
    /// identity's cached progress and skills.
    pub async fn on_auth_event(&self, event: AuthEvent) -> Option<RouteDecision> {
        if let AuthEvent::SignedOut { identity } = event {
            self.progress.evict(identity).await;
        }
        self.roles.on_auth_event(event).await
    }
}
