use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{Result, TrackError};
use crate::models::{ProgressCounts, ProgressSnapshot};
use crate::realtime::{ChangeFeed, ChangeFilter, FeedEvent, Subscription};
use crate::skills::{completed_skills, SkillsStore};

/// Denominators for the three progress fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTargets {
    pub skills: u32,
    pub experiences: u32,
    pub approvals: u32,
}

impl Default for ProgressTargets {
    fn default() -> Self {
        Self {
            skills: 22,
            experiences: 24,
            approvals: 24,
        }
    }
}

pub fn fraction(count: i64, target: u32) -> f64 {
    if target == 0 {
        return 1.0;
    }
    (count.max(0) as f64 / target as f64).min(1.0)
}

/// Rounded mean of the three fractions, as a percentage.
pub fn overall_progress(counts: &ProgressCounts, targets: &ProgressTargets) -> u8 {
    let skills = fraction(counts.completed_skills as i64, targets.skills);
    let experiences = fraction(counts.documented_experiences, targets.experiences);
    let approvals = fraction(counts.supervisor_approvals, targets.approvals);

    let average = (skills + experiences + approvals) / 3.0;
    (average * 100.0).round().clamp(0.0, 100.0) as u8
}

type PendingProgress =
    Shared<BoxFuture<'static, std::result::Result<ProgressSnapshot, Arc<TrackError>>>>;

/// Computes and caches each EIT's overall progress. Concurrent requests for
/// the same identity share one in-flight computation.
pub struct ProgressAggregator {
    backend: Arc<dyn Backend>,
    skills: Arc<SkillsStore>,
    targets: ProgressTargets,
    snapshots: Arc<RwLock<HashMap<Uuid, ProgressSnapshot>>>,
    in_flight: Arc<Mutex<HashMap<Uuid, PendingProgress>>>,
}

impl ProgressAggregator {
    pub fn new(backend: Arc<dyn Backend>, skills: Arc<SkillsStore>) -> Self {
        Self::with_targets(backend, skills, ProgressTargets::default())
    }

    pub fn with_targets(
        backend: Arc<dyn Backend>,
        skills: Arc<SkillsStore>,
        targets: ProgressTargets,
    ) -> Self {
        Self {
            backend,
            skills,
            targets,
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Loads skills if they are not cached yet, then aggregates. Joins a
    /// computation already running for the identity.
    pub async fn initialize(&self, eit_id: Uuid) -> Result<ProgressSnapshot> {
        self.run(eit_id, false).await
    }

    /// Recomputes from fresh rows. A computation already in flight may have
    /// read rows before the caller's change, so it is awaited and a new one
    /// is started (or joined, if another caller got there first).
    pub async fn update_progress(&self, eit_id: Uuid) -> Result<ProgressSnapshot> {
        if let Some(pending) = self.pending(eit_id) {
            let _ = pending.await;
        }
        self.run(eit_id, true).await
    }

    pub async fn snapshot(&self, eit_id: Uuid) -> Option<ProgressSnapshot> {
        self.snapshots.read().await.get(&eit_id).cloned()
    }

    /// Drops the cached snapshot and skill tree for a signed-out identity.
    pub async fn evict(&self, eit_id: Uuid) {
        self.snapshots.write().await.remove(&eit_id);
        self.skills.evict(eit_id).await;
    }

    /// Recomputes progress whenever the identity's experiences or skill
    /// ranks change, or when the feed reports missed changes. Stops when the
    /// subscription is dropped.
    pub fn watch(self: &Arc<Self>, eit_id: Uuid, feed: &ChangeFeed) -> Subscription {
        let aggregator = Arc::clone(self);
        feed.subscribe(
            ChangeFilter::new(eit_id, &["experiences", "eit_skills"]),
            move |event| {
                let aggregator = Arc::clone(&aggregator);
                async move {
                    match &event {
                        FeedEvent::Change(change) => {
                            debug!(identity = %eit_id, table = %change.table, "recomputing progress")
                        }
                        FeedEvent::Resync { skipped } => {
                            debug!(identity = %eit_id, skipped, "resyncing progress")
                        }
                    }
                    if let Err(error) = aggregator.update_progress(eit_id).await {
                        warn!(identity = %eit_id, %error, "progress refresh failed");
                    }
                }
            },
        )
    }

    fn pending(&self, eit_id: Uuid) -> Option<PendingProgress> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&eit_id)
            .cloned()
    }

    async fn run(&self, eit_id: Uuid, force_skills: bool) -> Result<ProgressSnapshot> {
        let pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(&eit_id) {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.compute(eit_id, force_skills).boxed().shared();
                    in_flight.insert(eit_id, pending.clone());
                    pending
                }
            }
        };

        pending.await.map_err(TrackError::Shared)
    }

    fn compute(
        &self,
        eit_id: Uuid,
        force_skills: bool,
    ) -> impl std::future::Future<Output = std::result::Result<ProgressSnapshot, Arc<TrackError>>>
           + Send
           + 'static {
        let backend = Arc::clone(&self.backend);
        let skills = Arc::clone(&self.skills);
        let snapshots = Arc::clone(&self.snapshots);
        let in_flight = Arc::clone(&self.in_flight);
        let targets = self.targets;

        async move {
            let result = aggregate(backend.as_ref(), &skills, &targets, eit_id, force_skills).await;

            if let Ok(snapshot) = &result {
                snapshots.write().await.insert(eit_id, snapshot.clone());
            }
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&eit_id);

            result.map_err(Arc::new)
        }
    }
}

async fn aggregate(
    backend: &dyn Backend,
    skills: &SkillsStore,
    targets: &ProgressTargets,
    eit_id: Uuid,
    force_skills: bool,
) -> Result<ProgressSnapshot> {
    let categories = skills.load_user_skills(eit_id, force_skills).await?;

    let (documented_experiences, supervisor_approvals) = tokio::try_join!(
        backend.count_documented_experiences(eit_id),
        backend.count_supervisor_approvals(eit_id),
    )?;

    let counts = ProgressCounts {
        completed_skills: completed_skills(&categories),
        documented_experiences,
        supervisor_approvals,
    };
    let overall = overall_progress(&counts, targets);

    info!(identity = %eit_id, overall, "progress computed");
    Ok(ProgressSnapshot {
        overall_progress: overall,
        completed_skills: counts.completed_skills,
        documented_experiences: counts.documented_experiences,
        supervisor_approvals: counts.supervisor_approvals,
        computed_at: Utc::now(),
    })
}
