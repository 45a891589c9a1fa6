//! In-memory stores, bundle fixtures and wire helpers shared by the unit tests.

use std::{
    collections::HashMap,
    io::{Cursor, Write},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use be_release_db::{
    DbError, DbResult, NewRelease, Platform, Release, Tracking, TrackingMetrics,
};
use be_storage::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{
    config::OtaConfig,
    content::MetadataDigest,
    service::AppState,
    signing::{DEFAULT_KEY_ID, ManifestSigner},
    store::{BundleStore, ReleaseStore},
};

pub const TEST_PRIVATE_KEY: &str = include_str!("../fixtures/test-private-key.pem");

#[derive(Default)]
struct Rows {
    releases: Vec<Release>,
    tracking: Vec<Tracking>,
}

#[derive(Default)]
pub struct MemoryReleaseStore {
    rows: Mutex<Rows>,
    unavailable: bool,
}

impl MemoryReleaseStore {
    /// A store whose every call fails as if the database were down.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn tracking_count(&self) -> usize {
        self.rows.lock().unwrap().tracking.len()
    }

    pub fn tracking(&self) -> Vec<Tracking> {
        self.rows.lock().unwrap().tracking.clone()
    }

    pub fn set_update_id(&self, id: Uuid, update_id: &str) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(release) = rows.releases.iter_mut().find(|r| r.id == id) {
            release.update_id = update_id.to_string();
        }
    }

    fn check(&self) -> DbResult<()> {
        if self.unavailable {
            return Err(DbError::connection("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn latest_release(&self, runtime_version: &str) -> DbResult<Option<Release>> {
        self.check()?;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .releases
            .iter()
            .enumerate()
            .filter(|(_, r)| r.runtime_version == runtime_version)
            .max_by(|(a_seq, a), (b_seq, b)| a.timestamp.cmp(&b.timestamp).then(a_seq.cmp(b_seq)))
            .map(|(_, r)| r.clone()))
    }

    async fn release_by_path(&self, path: &str) -> DbResult<Option<Release>> {
        self.check()?;
        let rows = self.rows.lock().unwrap();
        Ok(rows.releases.iter().find(|r| r.path == path).cloned())
    }

    async fn create_release(&self, release: NewRelease) -> DbResult<Release> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        if rows.releases.iter().any(|r| r.path == release.path) {
            return Err(DbError::duplicate("path", release.path));
        }
        let release = release.into_release(Uuid::now_v7());
        rows.releases.push(release.clone());
        Ok(release)
    }

    async fn create_tracking(
        &self,
        release_id: Uuid,
        platform: Platform,
        download_timestamp: DateTime<Utc>,
    ) -> DbResult<Tracking> {
        self.check()?;
        let tracking = Tracking {
            id: Uuid::now_v7(),
            release_id,
            platform,
            download_timestamp,
        };
        self.rows.lock().unwrap().tracking.push(tracking.clone());
        Ok(tracking)
    }

    async fn list_releases(&self) -> DbResult<Vec<Release>> {
        self.check()?;
        let mut releases = self.rows.lock().unwrap().releases.clone();
        releases.reverse();
        releases.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(releases)
    }

    async fn tracking_metrics(&self, release_id: Option<Uuid>) -> DbResult<Vec<TrackingMetrics>> {
        self.check()?;
        let rows = self.rows.lock().unwrap();
        Ok(Platform::ALL
            .into_iter()
            .map(|platform| TrackingMetrics {
                platform,
                count: rows
                    .tracking
                    .iter()
                    .filter(|t| t.platform == platform)
                    .filter(|t| release_id.is_none_or(|id| t.release_id == id))
                    .count() as i64,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryBundleStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failing_prefixes: Vec<String>,
}

impl MemoryBundleStore {
    /// Writes under `prefix` fail.
    pub fn fail_writes_under(mut self, prefix: &str) -> Self {
        self.failing_prefixes.push(prefix.to_string());
        self
    }

    pub fn insert(&self, path: &str, content: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), content);
    }

    pub fn remove(&self, path: &str) {
        self.objects.lock().unwrap().remove(path);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(path)
    }
}

#[async_trait]
impl BundleStore for MemoryBundleStore {
    async fn read_bundle(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::not_found(path))
    }

    async fn write_bundle(&self, path: &str, content: Vec<u8>) -> StorageResult<String> {
        if self.failing_prefixes.iter().any(|p| path.starts_with(p)) {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.insert(path, content);
        Ok(path.to_string())
    }

    async fn bundle_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.contains(path))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Builds update archives shaped like `expo export` output.
pub struct BundleBuilder {
    platforms: Vec<Platform>,
    assets: Vec<(String, String, Vec<u8>)>,
    app_config: String,
    rollback: bool,
}

impl BundleBuilder {
    pub const IOS_BUNDLE: &'static str = "_expo/static/js/ios/index-4a1b2c3d.hbc";
    pub const ANDROID_BUNDLE: &'static str = "_expo/static/js/android/index-5e6f7a8b.hbc";
    pub const LAUNCH_CONTENT: &'static [u8] = b"__d(function(){ /* bundle */ });";

    pub fn new() -> Self {
        Self {
            platforms: Platform::ALL.to_vec(),
            assets: Vec::new(),
            app_config: r#"{"name":"demo","slug":"demo","runtimeVersion":"1.0.0"}"#.to_string(),
            rollback: false,
        }
    }

    pub fn launch_bundle(platform: Platform) -> &'static str {
        match platform {
            Platform::Ios => Self::IOS_BUNDLE,
            Platform::Android => Self::ANDROID_BUNDLE,
        }
    }

    pub fn asset(mut self, path: &str, ext: &str, content: &[u8]) -> Self {
        self.assets
            .push((path.to_string(), ext.to_string(), content.to_vec()));
        self
    }

    pub fn only_platform(mut self, platform: Platform) -> Self {
        self.platforms = vec![platform];
        self
    }

    pub fn app_config(mut self, raw: &str) -> Self {
        self.app_config = raw.to_string();
        self
    }

    pub fn rollback(mut self) -> Self {
        self.rollback = true;
        self
    }

    pub fn metadata_json(&self) -> Vec<u8> {
        let assets: Vec<_> = self
            .assets
            .iter()
            .map(|(path, ext, _)| json!({ "path": path, "ext": ext }))
            .collect();
        let file_metadata: serde_json::Map<String, serde_json::Value> = self
            .platforms
            .iter()
            .map(|platform| {
                (
                    platform.as_str().to_string(),
                    json!({ "bundle": Self::launch_bundle(*platform), "assets": assets }),
                )
            })
            .collect();

        serde_json::to_vec(&json!({
            "version": 0,
            "bundler": "metro",
            "fileMetadata": file_metadata,
        }))
        .unwrap()
    }

    pub fn build(self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        let mut add = |name: &str, content: &[u8]| {
            zip.start_file(name, options).unwrap();
            zip.write_all(content).unwrap();
        };

        add("metadata.json", &self.metadata_json());
        add("expoConfig.json", self.app_config.as_bytes());
        for platform in &self.platforms {
            add(Self::launch_bundle(*platform), Self::LAUNCH_CONTENT);
        }
        for (path, _, content) in &self.assets {
            add(path, content);
        }
        if self.rollback {
            add("rollback", b"");
        }

        zip.finish().unwrap().into_inner()
    }
}

pub fn new_release(runtime_version: &str, path: &str, timestamp: DateTime<Utc>) -> NewRelease {
    NewRelease {
        runtime_version: runtime_version.to_string(),
        path: path.to_string(),
        timestamp,
        commit_hash: "abc123".to_string(),
        commit_message: "Initial release".to_string(),
        release_notes: None,
        update_id: "00000000-0000-8000-8000-000000000000".to_string(),
    }
}

/// Stores `bundle` and records a release for it, as an upload would.
pub async fn seed_release(
    releases: &MemoryReleaseStore,
    bundles: &MemoryBundleStore,
    runtime_version: &str,
    bundle: Vec<u8>,
) -> Release {
    let metadata = crate::archive::BundleArchive::open(bundle.clone())
        .unwrap()
        .metadata()
        .unwrap();
    let path = format!("updates/{runtime_version}/{}.zip", Uuid::new_v4().simple());
    bundles.insert(&path, bundle);

    let mut release = new_release(runtime_version, &path, Utc::now());
    release.update_id = MetadataDigest::of(&metadata.raw).update_id_string();
    releases.create_release(release).await.unwrap()
}

pub fn test_signer() -> ManifestSigner {
    ManifestSigner::from_pem(TEST_PRIVATE_KEY, DEFAULT_KEY_ID).unwrap()
}

pub fn test_state(
    releases: Arc<MemoryReleaseStore>,
    bundles: Arc<MemoryBundleStore>,
) -> Arc<AppState> {
    Arc::new(AppState::new(OtaConfig::default(), releases, bundles).unwrap())
}

/// One part of a multipart/mixed response.
#[derive(Debug, Clone)]
pub struct ParsedPart {
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ParsedPart {
    pub fn name(&self) -> Option<&str> {
        self.headers
            .get("content-disposition")?
            .split("name=\"")
            .nth(1)?
            .split('"')
            .next()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

pub fn parse_multipart_mixed(content_type: &str, body: &[u8]) -> Vec<ParsedPart> {
    let boundary = content_type
        .split("boundary=")
        .nth(1)
        .expect("content type carries a boundary");
    let body = std::str::from_utf8(body).unwrap();
    let delimiter = format!("--{boundary}");

    body.split(&delimiter)
        .skip(1)
        .take_while(|chunk| !chunk.starts_with("--"))
        .map(|chunk| {
            let chunk = chunk.strip_prefix("\r\n").unwrap_or(chunk);
            let (head, body) = chunk.split_once("\r\n\r\n").unwrap();
            let headers = head
                .split("\r\n")
                .filter_map(|line| line.split_once(": "))
                .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
                .collect();
            ParsedPart {
                headers,
                body: body.strip_suffix("\r\n").unwrap_or(body).to_string(),
            }
        })
        .collect()
}

/// multipart/form-data request body, as an upload client would send it.
#[derive(Default)]
pub struct FormBuilder {
    body: Vec<u8>,
}

impl FormBuilder {
    const BOUNDARY: &'static str = "ota-test-boundary";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, filename: &str, content: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/zip\r\n\r\n",
                Self::BOUNDARY
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(content);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                Self::BOUNDARY
            )
            .as_bytes(),
        );
        self
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", Self::BOUNDARY)
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", Self::BOUNDARY).as_bytes());
        self.body
    }
}
