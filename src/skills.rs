use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{Result, TrackError};
use crate::models::{Skill, SkillCategory, SkillRow};

pub const MAX_RANK: u8 = 5;

/// Competency categories and their skills, in display order.
pub const SKILL_CATALOG: &[(&str, &[(&str, &str)])] = &[
    (
        "Technical Competence",
        &[
            ("1.1", "Regulations, codes and standards"),
            ("1.2", "Technical and design constraints"),
            ("1.3", "Risk management for technical work"),
            ("1.4", "Application of theory"),
            ("1.5", "Solution techniques and results verification"),
            ("1.6", "Safety in design and technical work"),
            ("1.7", "Systems and their components"),
        ],
    ),
    (
        "Communication",
        &[
            ("2.1", "Oral communication"),
            ("2.2", "Written communication"),
            ("2.3", "Reading and comprehension"),
        ],
    ),
    (
        "Project and Financial Management",
        &[
            ("3.1", "Project management principles"),
            ("3.2", "Finances and budget"),
            ("3.3", "Scheduling and resource planning"),
            ("3.4", "Quality management"),
        ],
    ),
    (
        "Team Effectiveness",
        &[
            ("4.1", "Promoting team effectiveness"),
            ("4.2", "Resolving conflict"),
        ],
    ),
    (
        "Professional Accountability",
        &[
            ("5.1", "Professional accountability"),
            ("5.2", "Knowledge of professional scope"),
            ("5.3", "Ethics and conduct"),
        ],
    ),
    (
        "Social, Economic, Environmental and Sustainability",
        &[
            ("6.1", "Protection of the public interest"),
            ("6.2", "Benefits of engineering to the public"),
            ("6.3", "Environmental and sustainability impacts"),
        ],
    ),
];

pub fn validate_rank(rank: u8) -> Result<()> {
    if rank > MAX_RANK {
        return Err(TrackError::validation(format!(
            "Rank must be between 0 and {MAX_RANK}"
        )));
    }
    Ok(())
}

/// Groups flat skill rows into categories, keeping the order the rows
/// arrive in.
pub fn build_tree(rows: &[SkillRow]) -> Vec<SkillCategory> {
    let mut categories: Vec<SkillCategory> = Vec::new();

    for row in rows {
        let skill = Skill {
            id: row.skill_id,
            category_id: row.category_id,
            code: row.code.clone(),
            name: row.name.clone(),
            rank: row.rank.and_then(|rank| u8::try_from(rank).ok()),
        };

        match categories.iter_mut().find(|c| c.id == row.category_id) {
            Some(category) => category.skills.push(skill),
            None => categories.push(SkillCategory {
                id: row.category_id,
                name: row.category_name.clone(),
                skills: vec![skill],
            }),
        }
    }

    categories
}

pub fn completed_skills(categories: &[SkillCategory]) -> usize {
    categories.iter().map(SkillCategory::completed).sum()
}

/// Per-identity cache of the category/skill tree.
pub struct SkillsStore {
    backend: Arc<dyn Backend>,
    trees: RwLock<HashMap<Uuid, Vec<SkillCategory>>>,
}

impl SkillsStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            trees: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached tree unless `force` is set or nothing is cached.
    /// A failed fetch leaves the previous tree in place.
    pub async fn load_user_skills(&self, eit_id: Uuid, force: bool) -> Result<Vec<SkillCategory>> {
        if !force {
            if let Some(tree) = self.trees.read().await.get(&eit_id) {
                if !tree.is_empty() {
                    return Ok(tree.clone());
                }
            }
        }

        let rows = match self.backend.fetch_user_skills(eit_id).await {
            Ok(rows) => rows,
            Err(error) => {
                warn!(identity = %eit_id, %error, "failed to load skills, keeping cached tree");
                return Err(error);
            }
        };

        let tree = build_tree(&rows);
        debug!(identity = %eit_id, categories = tree.len(), "skills loaded");
        self.trees.write().await.insert(eit_id, tree.clone());
        Ok(tree)
    }

    pub async fn categories(&self, eit_id: Uuid) -> Option<Vec<SkillCategory>> {
        self.trees.read().await.get(&eit_id).cloned()
    }

    pub async fn is_loaded(&self, eit_id: Uuid) -> bool {
        self.trees
            .read()
            .await
            .get(&eit_id)
            .is_some_and(|tree| !tree.is_empty())
    }

    pub async fn evict(&self, eit_id: Uuid) {
        self.trees.write().await.remove(&eit_id);
    }

    pub async fn completed_count(&self, eit_id: Uuid) -> Option<usize> {
        self.trees
            .read()
            .await
            .get(&eit_id)
            .map(|tree| completed_skills(tree))
    }

    pub async fn set_rank(&self, eit_id: Uuid, skill_id: Uuid, rank: u8) -> Result<()> {
        validate_rank(rank)?;
        self.backend.set_skill_rank(eit_id, skill_id, rank).await?;

        if let Some(tree) = self.trees.write().await.get_mut(&eit_id) {
            if let Some(skill) = tree
                .iter_mut()
                .flat_map(|category| category.skills.iter_mut())
                .find(|skill| skill.id == skill_id)
            {
                skill.rank = Some(rank);
            }
        }

        Ok(())
    }

    pub async fn set_rank_by_code(&self, eit_id: Uuid, code: &str, rank: u8) -> Result<()> {
        validate_rank(rank)?;
        let tree = self.load_user_skills(eit_id, false).await?;
        let skill_id = tree
            .iter()
            .flat_map(|category| category.skills.iter())
            .find(|skill| skill.code == code)
            .map(|skill| skill.id)
            .ok_or(TrackError::NotFound("skill"))?;

        self.set_rank(eit_id, skill_id, rank).await
    }

    /// Imports `email,code,rank` rows. Returns the number of ranks written.
    pub async fn import_ranks<R: Read>(&self, reader: R) -> Result<usize> {
        #[derive(Deserialize)]
        struct CsvRow {
            email: String,
            code: String,
            rank: u8,
        }

        let mut rows = Vec::new();
        for record in csv::Reader::from_reader(reader).deserialize::<CsvRow>() {
            let row = record?;
            validate_rank(row.rank)?;
            rows.push(row);
        }

        let mut identities: HashMap<String, Uuid> = HashMap::new();
        let mut written = 0usize;

        for row in rows {
            let eit_id = match identities.get(&row.email) {
                Some(id) => *id,
                None => {
                    let profile = self
                        .backend
                        .find_eit_by_email(&row.email)
                        .await?
                        .ok_or(TrackError::NotFound("EIT profile"))?;
                    identities.insert(row.email.clone(), profile.id);
                    profile.id
                }
            };

            self.set_rank_by_code(eit_id, &row.code, row.rank).await?;
            written += 1;
        }

        Ok(written)
    }
}
