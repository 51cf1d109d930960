use crate::store::{MediaRecordStore, RecordStoreError, RecordStoreResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaflow_core::{Config, Media, MediaStatus, RawLocation};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Setup database connection pool and run migrations
pub async fn setup_database(config: &Config) -> Result<PgPool> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    // Run pending migrations on startup (path: workspace migrations/ from crate root)
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

#[derive(Debug, FromRow)]
struct MediaRow {
    id: Uuid,
    status: String,
    raw_bucket: String,
    raw_object: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MediaRow> for Media {
    type Error = RecordStoreError;

    fn try_from(row: MediaRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<MediaStatus>()
            .map_err(|e| RecordStoreError::Corrupt(e.to_string()))?;
        Ok(Media {
            id: row.id,
            status,
            raw: RawLocation {
                bucket: row.raw_bucket,
                object: row.raw_object,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed record store
#[derive(Clone)]
pub struct MediaRepository {
    pool: PgPool,
}

impl MediaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, id: Uuid) -> RecordStoreResult<MediaStatus> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM media WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        status
            .ok_or(RecordStoreError::NotFound(id))?
            .parse::<MediaStatus>()
            .map_err(|e| RecordStoreError::Corrupt(e.to_string()))
    }
}

#[async_trait]
impl MediaRecordStore for MediaRepository {
    #[tracing::instrument(skip(self, media), fields(media_id = %media.id))]
    async fn insert(&self, media: &Media) -> RecordStoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO media (id, status, raw_bucket, raw_object, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(media.id)
        .bind(media.status.as_str())
        .bind(&media.raw.bucket)
        .bind(&media.raw.object)
        .bind(media.created_at)
        .bind(media.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RecordStoreError::Duplicate(media.id)
            }
            _ => RecordStoreError::Database(e),
        })?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RecordStoreResult<Media> {
        let row = sqlx::query_as::<_, MediaRow>(
            r#"
            SELECT id, status, raw_bucket, raw_object, created_at, updated_at
            FROM media
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(RecordStoreError::NotFound(id))?.try_into()
    }

    #[tracing::instrument(skip(self), fields(media_id = %id, status = %status))]
    async fn update_status(&self, id: Uuid, status: MediaStatus) -> RecordStoreResult<()> {
        let allowed: Vec<String> = MediaStatus::predecessors(status)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE media
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&allowed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let from = self.current_status(id).await?;
            return Err(RecordStoreError::InvalidTransition {
                id,
                from,
                to: status,
            });
        }

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(media_id = %id, from = %from, to = %to))]
    async fn transition_status(
        &self,
        id: Uuid,
        from: MediaStatus,
        to: MediaStatus,
    ) -> RecordStoreResult<bool> {
        if !from.can_transition_to(to) {
            return Err(RecordStoreError::InvalidTransition { id, from, to });
        }

        let result = sqlx::query(
            r#"
            UPDATE media
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // distinguishes a lost race from an unknown id
            self.current_status(id).await?;
            return Ok(false);
        }

        Ok(true)
    }
}
