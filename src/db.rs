use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{Result, TrackError};
use crate::models::{
    EitProfile, NewNotification, Notification, ProfileUpdate, Relationship, RelationshipStatus,
    Sao, SkillRow, Subscription, SupervisorProfile, Tier, Validator,
};
use crate::skills::SKILL_CATALOG;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    for (category_id, (category_name, skills)) in SKILL_CATALOG.iter().enumerate() {
        let category_id = category_id as i32 + 1;
        sqlx::query(
            r#"
            INSERT INTO eit_track.skill_categories (id, name, sort_order)
            VALUES ($1, $2, $1)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(category_id)
        .bind(*category_name)
        .execute(pool)
        .await?;

        for (position, (code, name)) in skills.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO eit_track.skills (id, category_id, code, name, sort_order)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (code) DO UPDATE
                SET name = EXCLUDED.name, category_id = EXCLUDED.category_id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(category_id)
            .bind(*code)
            .bind(*name)
            .bind(position as i32)
            .execute(pool)
            .await?;
        }
    }

    let eit_id = Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?;
    let supervisor_id = Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?;

    sqlx::query(
        r#"
        INSERT INTO eit_track.eit_profiles (id, full_name, email, start_date, target_date)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name
        "#,
    )
    .bind(eit_id)
    .bind("Avery Lee")
    .bind("avery.lee@example.com")
    .bind(NaiveDate::from_ymd_opt(2024, 9, 3).context("invalid date")?)
    .bind(NaiveDate::from_ymd_opt(2028, 9, 1).context("invalid date")?)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO eit_track.supervisor_profiles (id, full_name, email, organization)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name, organization = EXCLUDED.organization
        "#,
    )
    .bind(supervisor_id)
    .bind("Jules Moreno")
    .bind("jules.moreno@example.com")
    .bind("Moreno Structural Ltd.")
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO eit_track.subscriptions (user_id, tier, status)
        VALUES ($1, 'free', 'active')
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(supervisor_id)
    .execute(pool)
    .await?;

    let ranked = [("1.1", 3), ("1.2", 2), ("2.1", 4), ("3.1", 1)];
    for (code, rank) in ranked {
        sqlx::query(
            r#"
            INSERT INTO eit_track.eit_skills (eit_id, skill_id, rank)
            SELECT $1, id, $3 FROM eit_track.skills WHERE code = $2
            ON CONFLICT (eit_id, skill_id) DO NOTHING
            "#,
        )
        .bind(eit_id)
        .bind(code)
        .bind(rank as i16)
        .execute(pool)
        .await?;
    }

    let experiences = [
        ("Retaining wall design review", true),
        ("Site inspection report", false),
        ("Client presentation", false),
    ];
    for (title, approved) in experiences {
        sqlx::query(
            r#"
            INSERT INTO eit_track.experiences (id, eit_id, title, supervisor_approved)
            SELECT $1, $2, $3, $4
            WHERE NOT EXISTS (
                SELECT 1 FROM eit_track.experiences WHERE eit_id = $2 AND title = $3
            )
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(eit_id)
        .bind(title)
        .bind(approved)
        .execute(pool)
        .await?;
    }

    let sao_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO eit_track.saos (id, eit_id, title, situation, action, outcome)
        SELECT $1, $2, $3, $4, $5, $6
        WHERE NOT EXISTS (
            SELECT 1 FROM eit_track.saos WHERE eit_id = $2 AND title = $3
        )
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(eit_id)
    .bind("Culvert replacement")
    .bind("A failing culvert needed replacement before spring runoff.")
    .bind("I sized the replacement against the provincial drainage code.")
    .bind("The design was approved and built two weeks ahead of schedule.")
    .fetch_optional(pool)
    .await?;

    if let Some(sao_id) = sao_id {
        sqlx::query(
            r#"
            INSERT INTO eit_track.sao_skills (sao_id, skill_id)
            SELECT $1, id FROM eit_track.skills WHERE code = '1.1'
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(sao_id)
        .execute(pool)
        .await?;
    }

    info!("seed data written");
    Ok(())
}

pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn eit_from_row(row: &PgRow) -> EitProfile {
    EitProfile {
        id: row.get("id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        start_date: row.get("start_date"),
        target_date: row.get("target_date"),
    }
}

fn supervisor_from_row(row: &PgRow) -> SupervisorProfile {
    SupervisorProfile {
        id: row.get("id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        organization: row.get("organization"),
    }
}

fn notification_from_row(row: &PgRow) -> Notification {
    Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind: row.get("kind"),
        title: row.get("title"),
        message: row.get("message"),
        link: row.get("link"),
        read: row.get("read"),
        created_at: row.get("created_at"),
    }
}

fn relationship_from_row(row: &PgRow) -> Result<Relationship> {
    let status: String = row.get("status");
    let status = status
        .parse()
        .map_err(|e: String| TrackError::Database(sqlx::Error::Decode(e.into())))?;

    Ok(Relationship {
        id: row.get("id"),
        eit_id: row.get("eit_id"),
        supervisor_id: row.get("supervisor_id"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const EIT_COLUMNS: &str = "id, full_name, email, start_date, target_date";
const SUPERVISOR_COLUMNS: &str = "id, full_name, email, organization";
const RELATIONSHIP_COLUMNS: &str = "id, eit_id, supervisor_id, status, created_at, updated_at";

#[async_trait]
impl Backend for PgBackend {
    async fn fetch_eit_profile(&self, id: Uuid) -> Result<Option<EitProfile>> {
        let query = format!("SELECT {EIT_COLUMNS} FROM eit_track.eit_profiles WHERE id = $1 LIMIT 1");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(eit_from_row))
    }

    async fn fetch_supervisor_profile(&self, id: Uuid) -> Result<Option<SupervisorProfile>> {
        let query = format!(
            "SELECT {SUPERVISOR_COLUMNS} FROM eit_track.supervisor_profiles WHERE id = $1 LIMIT 1"
        );
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(supervisor_from_row))
    }

    async fn find_eit_by_email(&self, email: &str) -> Result<Option<EitProfile>> {
        let query = format!("SELECT {EIT_COLUMNS} FROM eit_track.eit_profiles WHERE email = $1");
        let row = sqlx::query(&query).bind(email).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(eit_from_row))
    }

    async fn find_supervisor_by_email(&self, email: &str) -> Result<Option<SupervisorProfile>> {
        let query =
            format!("SELECT {SUPERVISOR_COLUMNS} FROM eit_track.supervisor_profiles WHERE email = $1");
        let row = sqlx::query(&query).bind(email).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(supervisor_from_row))
    }

    async fn insert_eit_profile(&self, profile: &EitProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO eit_track.eit_profiles (id, full_name, email, start_date, target_date)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(profile.id)
        .bind(&profile.full_name)
        .bind(&profile.email)
        .bind(profile.start_date)
        .bind(profile.target_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_supervisor_profile(&self, profile: &SupervisorProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO eit_track.supervisor_profiles (id, full_name, email, organization)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(profile.id)
        .bind(&profile.full_name)
        .bind(&profile.email)
        .bind(&profile.organization)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_eit_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE eit_track.eit_profiles
            SET full_name = COALESCE($2, full_name)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.full_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrackError::NotFound("profile"));
        }
        Ok(())
    }

    async fn update_supervisor_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE eit_track.supervisor_profiles
            SET full_name = COALESCE($2, full_name),
                organization = COALESCE($3, organization)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.full_name)
        .bind(&update.organization)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrackError::NotFound("profile"));
        }
        Ok(())
    }

    async fn update_timeline(
        &self,
        eit_id: Uuid,
        start_date: Option<NaiveDate>,
        target_date: Option<NaiveDate>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE eit_track.eit_profiles SET start_date = $2, target_date = $3 WHERE id = $1",
        )
        .bind(eit_id)
        .bind(start_date)
        .bind(target_date)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrackError::NotFound("profile"));
        }
        Ok(())
    }

    async fn record_terms_acceptance(&self, user_id: Uuid, version: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO eit_track.terms_acceptance (user_id, version)
            VALUES ($1, $2)
            ON CONFLICT (user_id, version) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_account(&self, user_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in [
            "notifications",
            "notification_preferences",
            "subscriptions",
            "terms_acceptance",
        ] {
            let query = format!("DELETE FROM eit_track.{table} WHERE user_id = $1");
            sqlx::query(&query).bind(user_id).execute(&mut *tx).await?;
        }

        sqlx::query("DELETE FROM eit_track.eit_profiles WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM eit_track.supervisor_profiles WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_user_skills(&self, eit_id: Uuid) -> Result<Vec<SkillRow>> {
        let records = sqlx::query(
            r#"
            SELECT c.id AS category_id, c.name AS category_name,
                   s.id AS skill_id, s.code, s.name, es.rank
            FROM eit_track.skills s
            JOIN eit_track.skill_categories c ON c.id = s.category_id
            LEFT JOIN eit_track.eit_skills es ON es.skill_id = s.id AND es.eit_id = $1
            ORDER BY c.sort_order, s.sort_order
            "#,
        )
        .bind(eit_id)
        .fetch_all(&self.pool)
        .await?;

        let mut rows = Vec::with_capacity(records.len());
        for row in records {
            rows.push(SkillRow {
                category_id: row.get("category_id"),
                category_name: row.get("category_name"),
                skill_id: row.get("skill_id"),
                code: row.get("code"),
                name: row.get("name"),
                rank: row.get("rank"),
            });
        }

        Ok(rows)
    }

    async fn set_skill_rank(&self, eit_id: Uuid, skill_id: Uuid, rank: u8) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO eit_track.eit_skills (eit_id, skill_id, rank, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (eit_id, skill_id) DO UPDATE
            SET rank = EXCLUDED.rank, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(eit_id)
        .bind(skill_id)
        .bind(rank as i16)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_documented_experiences(&self, eit_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM eit_track.experiences WHERE eit_id = $1")
            .bind(eit_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_supervisor_approvals(&self, eit_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM eit_track.experiences WHERE eit_id = $1 AND supervisor_approved",
        )
        .bind(eit_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn fetch_saos(&self, eit_id: Uuid) -> Result<Vec<Sao>> {
        let records = sqlx::query(
            r#"
            SELECT s.id, s.eit_id, s.title, s.situation, s.action, s.outcome, s.created_at,
                   COALESCE(
                       array_agg(ss.skill_id) FILTER (WHERE ss.skill_id IS NOT NULL),
                       '{}'
                   ) AS skill_ids
            FROM eit_track.saos s
            LEFT JOIN eit_track.sao_skills ss ON ss.sao_id = s.id
            WHERE s.eit_id = $1
            GROUP BY s.id
            ORDER BY s.created_at
            "#,
        )
        .bind(eit_id)
        .fetch_all(&self.pool)
        .await?;

        let mut saos = Vec::with_capacity(records.len());
        for row in records {
            saos.push(Sao {
                id: row.get("id"),
                eit_id: row.get("eit_id"),
                title: row.get("title"),
                situation: row.get("situation"),
                action: row.get("action"),
                outcome: row.get("outcome"),
                skill_ids: row.get("skill_ids"),
                created_at: row.get("created_at"),
            });
        }

        Ok(saos)
    }

    async fn fetch_validators(&self, eit_id: Uuid) -> Result<Vec<Validator>> {
        let records = sqlx::query(
            r#"
            SELECT id, eit_id, skill_id, full_name, email, status
            FROM eit_track.validators
            WHERE eit_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(eit_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .iter()
            .map(|row| Validator {
                id: row.get("id"),
                eit_id: row.get("eit_id"),
                skill_id: row.get("skill_id"),
                full_name: row.get("full_name"),
                email: row.get("email"),
                status: row.get("status"),
            })
            .collect())
    }

    async fn fetch_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let records = sqlx::query(
            r#"
            SELECT id, user_id, kind, title, message, link, read, created_at
            FROM eit_track.notifications
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.iter().map(notification_from_row).collect())
    }

    async fn insert_notification(&self, notification: &NewNotification) -> Result<Notification> {
        let row = sqlx::query(
            r#"
            INSERT INTO eit_track.notifications (id, user_id, kind, title, message, link)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, kind, title, message, link, read, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(notification.user_id)
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.link)
        .fetch_one(&self.pool)
        .await?;

        Ok(notification_from_row(&row))
    }

    async fn mark_notifications_read(&self, user_id: Uuid, ids: &[Uuid]) -> Result<()> {
        sqlx::query(
            "UPDATE eit_track.notifications SET read = TRUE WHERE user_id = $1 AND id = ANY($2)",
        )
        .bind(user_id)
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn email_enabled(&self, user_id: Uuid, kind: &str) -> Result<bool> {
        let enabled: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT email_enabled FROM eit_track.notification_preferences
            WHERE user_id = $1 AND kind = $2
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;

        Ok(enabled.unwrap_or(true))
    }

    async fn find_relationship(
        &self,
        eit_id: Uuid,
        supervisor_id: Uuid,
    ) -> Result<Option<Relationship>> {
        let query = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM eit_track.supervisor_eit_relationships \
             WHERE eit_id = $1 AND supervisor_id = $2"
        );
        let row = sqlx::query(&query)
            .bind(eit_id)
            .bind(supervisor_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(relationship_from_row).transpose()
    }

    async fn fetch_relationship(&self, id: Uuid) -> Result<Option<Relationship>> {
        let query = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM eit_track.supervisor_eit_relationships WHERE id = $1"
        );
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(relationship_from_row).transpose()
    }

    async fn count_active_eits(&self, supervisor_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM eit_track.supervisor_eit_relationships
            WHERE supervisor_id = $1 AND status = 'active'
            "#,
        )
        .bind(supervisor_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn fetch_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, tier, status, current_period_end
            FROM eit_track.subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let tier: String = row.get("tier");
        let tier: Tier = tier
            .parse()
            .map_err(|e: String| TrackError::Database(sqlx::Error::Decode(e.into())))?;
        Ok(Some(Subscription {
            user_id: row.get("user_id"),
            tier,
            status: row.get("status"),
            current_period_end: row.get("current_period_end"),
        }))
    }

    async fn upsert_pending_relationship(
        &self,
        eit_id: Uuid,
        supervisor_id: Uuid,
    ) -> Result<Relationship> {
        let query = format!(
            r#"
            INSERT INTO eit_track.supervisor_eit_relationships
            (id, eit_id, supervisor_id, status)
            VALUES ($1, $2, $3, 'pending')
            ON CONFLICT (eit_id, supervisor_id) DO UPDATE
            SET status = 'pending', updated_at = now()
            RETURNING {RELATIONSHIP_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(eit_id)
            .bind(supervisor_id)
            .fetch_one(&self.pool)
            .await?;

        relationship_from_row(&row)
    }

    async fn update_relationship_status(
        &self,
        id: Uuid,
        from: RelationshipStatus,
        to: RelationshipStatus,
    ) -> Result<Option<Relationship>> {
        let query = format!(
            r#"
            UPDATE eit_track.supervisor_eit_relationships
            SET status = $2, updated_at = now()
            WHERE id = $1 AND status = $3
            RETURNING {RELATIONSHIP_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(to.as_str())
            .bind(from.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(relationship_from_row).transpose()
    }

    async fn relationships_for_supervisor(&self, supervisor_id: Uuid) -> Result<Vec<Relationship>> {
        let query = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM eit_track.supervisor_eit_relationships \
             WHERE supervisor_id = $1 ORDER BY updated_at DESC"
        );
        let records = sqlx::query(&query)
            .bind(supervisor_id)
            .fetch_all(&self.pool)
            .await?;
        records.iter().map(relationship_from_row).collect()
    }

    async fn relationships_for_eit(&self, eit_id: Uuid) -> Result<Vec<Relationship>> {
        let query = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM eit_track.supervisor_eit_relationships \
             WHERE eit_id = $1 ORDER BY updated_at DESC"
        );
        let records = sqlx::query(&query).bind(eit_id).fetch_all(&self.pool).await?;
        records.iter().map(relationship_from_row).collect()
    }
}
