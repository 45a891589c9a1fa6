use bon::bon;
use chrono::{DateTime, Utc};
use sqlx::{
    migrate::MigrateDatabase,
    postgres::{PgPool, PgPoolOptions},
};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::DbResult,
    types::{NewRelease, Platform, Release, Tracking, TrackingMetrics},
};

const RELEASE_COLUMNS: &str = "id, runtime_version, path, timestamp, commit_hash, commit_message, release_notes, update_id";

#[derive(Debug, Clone)]
pub struct DatabaseManager {
    pub pool: PgPool,
}

#[bon]
impl DatabaseManager {
    pub async fn new(database_url: &str) -> DbResult<Self> {
        if !sqlx::Postgres::database_exists(database_url).await? {
            sqlx::Postgres::create_database(database_url).await?;
        }

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        let db_manager = DatabaseManager { pool };

        Self::run_migrations(&db_manager.pool).await?;

        Ok(db_manager)
    }

    async fn run_migrations(pool: &PgPool) -> DbResult<()> {
        let migrator = sqlx::migrate!("./src/migrations");
        migrator.run(pool).await?;
        Ok(())
    }

    /// Most recently uploaded release for a runtime version. Equal timestamps
    /// resolve to the row inserted last.
    pub async fn get_latest_release_for_runtime_version(
        &self,
        runtime_version: &str,
    ) -> DbResult<Option<Release>> {
        let query = format!(
            "SELECT {RELEASE_COLUMNS} FROM releases WHERE runtime_version = $1 ORDER BY timestamp DESC, seq DESC LIMIT 1"
        );

        let release = sqlx::query_as::<_, Release>(&query)
            .bind(runtime_version)
            .fetch_optional(&self.pool)
            .await?;

        Ok(release)
    }

    pub async fn get_release_by_path(&self, path: &str) -> DbResult<Option<Release>> {
        let query = format!("SELECT {RELEASE_COLUMNS} FROM releases WHERE path = $1 LIMIT 1");

        let release = sqlx::query_as::<_, Release>(&query)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        Ok(release)
    }

    pub async fn list_releases(&self) -> DbResult<Vec<Release>> {
        let query =
            format!("SELECT {RELEASE_COLUMNS} FROM releases ORDER BY timestamp DESC, seq DESC");

        let releases = sqlx::query_as::<_, Release>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(releases)
    }

    pub async fn create_release(&self, release: NewRelease) -> DbResult<Release> {
        let id = Uuid::now_v7();
        debug!(
            runtime_version = %release.runtime_version,
            path = %release.path,
            "Inserting release"
        );

        let release = sqlx::query_as::<_, Release>(
            r#"
            INSERT INTO releases (
                id, runtime_version, path, timestamp, commit_hash,
                commit_message, release_notes, update_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, runtime_version, path, timestamp, commit_hash,
                      commit_message, release_notes, update_id
            "#,
        )
        .bind(id)
        .bind(&release.runtime_version)
        .bind(&release.path)
        .bind(release.timestamp)
        .bind(&release.commit_hash)
        .bind(&release.commit_message)
        .bind(&release.release_notes)
        .bind(&release.update_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(release)
    }

    #[builder]
    pub async fn create_tracking(
        &self,
        release_id: Uuid,
        platform: Platform,
        download_timestamp: DateTime<Utc>,
    ) -> DbResult<Tracking> {
        let id = Uuid::now_v7();

        let tracking = sqlx::query_as::<_, Tracking>(
            r#"
            INSERT INTO releases_tracking (id, release_id, platform, download_timestamp)
            VALUES ($1, $2, $3, $4)
            RETURNING id, release_id, platform, download_timestamp
            "#,
        )
        .bind(id)
        .bind(release_id)
        .bind(platform)
        .bind(download_timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(tracking)
    }

    /// Per-platform download counts, for one release or across all of them.
    /// Both platforms are always reported.
    #[builder]
    pub async fn get_tracking_metrics(
        &self,
        release_id: Option<Uuid>,
    ) -> DbResult<Vec<TrackingMetrics>> {
        let rows: Vec<(Platform, i64)> = sqlx::query_as(
            r#"
            SELECT platform, COUNT(*)
            FROM releases_tracking
            WHERE ($1::uuid IS NULL OR release_id = $1)
            GROUP BY platform
            "#,
        )
        .bind(release_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Platform::ALL
            .into_iter()
            .map(|platform| TrackingMetrics {
                platform,
                count: rows
                    .iter()
                    .find(|(p, _)| *p == platform)
                    .map(|(_, count)| *count)
                    .unwrap_or(0),
            })
            .collect())
    }
}
