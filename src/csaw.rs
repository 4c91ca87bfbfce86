use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{Result, TrackError};
use crate::models::{EitProfile, Sao, SkillCategory, Validator};
use crate::skills::{SkillsStore, SKILL_CATALOG};

/// Ties one skill to the prefix of its form fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub skill_code: String,
    pub field_prefix: String,
}

pub fn default_mapping() -> Vec<FieldMapping> {
    SKILL_CATALOG
        .iter()
        .flat_map(|(_, skills)| skills.iter())
        .map(|(code, _)| FieldMapping {
            skill_code: code.to_string(),
            field_prefix: format!("skill_{}", code.replace('.', "_")),
        })
        .collect()
}

/// Reads `skill_code,field_prefix` rows.
pub fn load_mapping<R: Read>(reader: R) -> Result<Vec<FieldMapping>> {
    let mut mapping = Vec::new();
    for record in csv::Reader::from_reader(reader).deserialize::<FieldMapping>() {
        mapping.push(record?);
    }
    if mapping.is_empty() {
        return Err(TrackError::validation("Field mapping is empty"));
    }
    Ok(mapping)
}

/// Flattens an EIT's record into the form's field names. Skills missing
/// from the mapping are left out; mapped skills with no data get empty
/// values so every mapped field is present.
pub fn build_field_bag(
    profile: &EitProfile,
    categories: &[SkillCategory],
    saos: &[Sao],
    validators: &[Validator],
    mapping: &[FieldMapping],
) -> BTreeMap<String, String> {
    let mut bag = BTreeMap::new();

    bag.insert("applicant_name".to_string(), profile.full_name.clone());
    bag.insert("applicant_email".to_string(), profile.email.clone());
    bag.insert(
        "start_date".to_string(),
        profile.start_date.map(|d| d.to_string()).unwrap_or_default(),
    );
    bag.insert(
        "target_date".to_string(),
        profile.target_date.map(|d| d.to_string()).unwrap_or_default(),
    );

    let skills = categories.iter().flat_map(|category| category.skills.iter());
    let by_code: BTreeMap<&str, (Uuid, Option<u8>)> = skills
        .map(|skill| (skill.code.as_str(), (skill.id, skill.rank)))
        .collect();

    for entry in mapping {
        let (skill_id, rank) = match by_code.get(entry.skill_code.as_str()) {
            Some((id, rank)) => (Some(*id), *rank),
            None => (None, None),
        };

        let sao = skill_id.and_then(|id| saos.iter().find(|sao| sao.skill_ids.contains(&id)));
        let validator = skill_id.and_then(|id| validators.iter().find(|v| v.skill_id == id));

        let prefix = &entry.field_prefix;
        bag.insert(
            format!("{prefix}_rank"),
            rank.map(|r| r.to_string()).unwrap_or_default(),
        );
        bag.insert(
            format!("{prefix}_sao"),
            sao.map(Sao::narrative).unwrap_or_default(),
        );
        bag.insert(
            format!("{prefix}_validator"),
            validator.map(|v| v.full_name.clone()).unwrap_or_default(),
        );
    }

    bag
}

pub async fn field_bag_for(
    backend: &dyn Backend,
    skills: &SkillsStore,
    eit_id: Uuid,
    mapping: &[FieldMapping],
) -> Result<BTreeMap<String, String>> {
    let profile = backend
        .fetch_eit_profile(eit_id)
        .await?
        .ok_or(TrackError::NotFound("EIT profile"))?;
    let categories = skills.load_user_skills(eit_id, true).await?;
    let (saos, validators) =
        tokio::try_join!(backend.fetch_saos(eit_id), backend.fetch_validators(eit_id))?;

    Ok(build_field_bag(&profile, &categories, &saos, &validators, mapping))
}

pub fn write_csv<W: Write>(bag: &BTreeMap<String, String>, writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["field", "value"])?;
    for (field, value) in bag {
        writer.write_record([field, value])?;
    }
    writer
        .flush()
        .map_err(|e| TrackError::Csv(csv::Error::from(e)))?;
    Ok(())
}
