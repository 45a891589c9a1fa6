//! Storage seams used by the protocol engine and the upload workflow.
//!
//! The engine only talks to these traits; the server wires in the Postgres
//! [`DatabaseManager`] and the OpenDAL [`StorageService`], tests wire in
//! in-memory fakes.

use async_trait::async_trait;
use be_release_db::{
    DatabaseManager, DbResult, NewRelease, Platform, Release, Tracking, TrackingMetrics,
};
use be_storage::{StorageResult, StorageService};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn latest_release(&self, runtime_version: &str) -> DbResult<Option<Release>>;

    async fn release_by_path(&self, path: &str) -> DbResult<Option<Release>>;

    async fn create_release(&self, release: NewRelease) -> DbResult<Release>;

    async fn create_tracking(
        &self,
        release_id: Uuid,
        platform: Platform,
        download_timestamp: DateTime<Utc>,
    ) -> DbResult<Tracking>;

    async fn list_releases(&self) -> DbResult<Vec<Release>>;

    async fn tracking_metrics(&self, release_id: Option<Uuid>) -> DbResult<Vec<TrackingMetrics>>;
}

#[async_trait]
pub trait BundleStore: Send + Sync {
    async fn read_bundle(&self, path: &str) -> StorageResult<Vec<u8>>;

    async fn write_bundle(&self, path: &str, content: Vec<u8>) -> StorageResult<String>;

    async fn bundle_exists(&self, path: &str) -> StorageResult<bool>;

    fn backend_name(&self) -> &'static str;
}

#[async_trait]
impl ReleaseStore for DatabaseManager {
    async fn latest_release(&self, runtime_version: &str) -> DbResult<Option<Release>> {
        self.get_latest_release_for_runtime_version(runtime_version)
            .await
    }

    async fn release_by_path(&self, path: &str) -> DbResult<Option<Release>> {
        self.get_release_by_path(path).await
    }

    async fn create_release(&self, release: NewRelease) -> DbResult<Release> {
        DatabaseManager::create_release(self, release).await
    }

    async fn create_tracking(
        &self,
        release_id: Uuid,
        platform: Platform,
        download_timestamp: DateTime<Utc>,
    ) -> DbResult<Tracking> {
        DatabaseManager::create_tracking(self)
            .release_id(release_id)
            .platform(platform)
            .download_timestamp(download_timestamp)
            .call()
            .await
    }

    async fn list_releases(&self) -> DbResult<Vec<Release>> {
        DatabaseManager::list_releases(self).await
    }

    async fn tracking_metrics(&self, release_id: Option<Uuid>) -> DbResult<Vec<TrackingMetrics>> {
        self.get_tracking_metrics()
            .maybe_release_id(release_id)
            .call()
            .await
    }
}

#[async_trait]
impl BundleStore for StorageService {
    async fn read_bundle(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.read(path).await
    }

    async fn write_bundle(&self, path: &str, content: Vec<u8>) -> StorageResult<String> {
        self.write(path, content).await
    }

    async fn bundle_exists(&self, path: &str) -> StorageResult<bool> {
        self.exists(path).await
    }

    fn backend_name(&self) -> &'static str {
        self.get_backend_name()
    }
}
