use be_release_db::Release;
use tracing::{debug, instrument};

use crate::{error::OtaError, store::ReleaseStore};

/// Result of looking for the newest bundle of a runtime version. Having no
/// bundle is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateLookup {
    Found(Release),
    NoUpdate,
}

/// Most recently uploaded release for `runtime_version`.
#[instrument(skip(releases))]
pub async fn latest_update(
    releases: &dyn ReleaseStore,
    runtime_version: &str,
) -> Result<UpdateLookup, OtaError> {
    match releases.latest_release(runtime_version).await? {
        Some(release) => {
            debug!(path = %release.path, update_id = %release.update_id, "Found latest release");
            Ok(UpdateLookup::Found(release))
        }
        None => {
            debug!("No release for runtime version");
            Ok(UpdateLookup::NoUpdate)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::testing::{MemoryReleaseStore, new_release};

    #[tokio::test]
    async fn test_no_release_is_no_update() {
        let store = MemoryReleaseStore::default();
        store
            .create_release(new_release("1.0.0", "updates/1.0.0/a.zip", Utc::now()))
            .await
            .unwrap();

        assert_eq!(
            latest_update(&store, "2.0.0").await.unwrap(),
            UpdateLookup::NoUpdate
        );
    }

    #[tokio::test]
    async fn test_most_recent_timestamp_wins() {
        let store = MemoryReleaseStore::default();
        let now = Utc::now();
        store
            .create_release(new_release("1.0.0", "updates/1.0.0/new.zip", now))
            .await
            .unwrap();
        store
            .create_release(new_release(
                "1.0.0",
                "updates/1.0.0/old.zip",
                now - Duration::hours(1),
            ))
            .await
            .unwrap();

        match latest_update(&store, "1.0.0").await.unwrap() {
            UpdateLookup::Found(release) => assert_eq!(release.path, "updates/1.0.0/new.zip"),
            UpdateLookup::NoUpdate => panic!("expected a release"),
        }
    }

    #[tokio::test]
    async fn test_equal_timestamps_last_insert_wins() {
        let store = MemoryReleaseStore::default();
        let now = Utc::now();
        for path in ["updates/1.0.0/first.zip", "updates/1.0.0/second.zip"] {
            store
                .create_release(new_release("1.0.0", path, now))
                .await
                .unwrap();
        }

        match latest_update(&store, "1.0.0").await.unwrap() {
            UpdateLookup::Found(release) => {
                assert_eq!(release.path, "updates/1.0.0/second.zip")
            }
            UpdateLookup::NoUpdate => panic!("expected a release"),
        }
    }
}
