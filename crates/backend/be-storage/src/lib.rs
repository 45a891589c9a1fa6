//! Bundle storage backend implementation using OpenDAL.
//!
//! Uploaded update archives are written once per target runtime version and
//! read back whenever a manifest or asset is served. The backend is either the
//! local filesystem or S3, configurable via environment variables.
//!
//! ## Environment Variables
//!
//! - `BUNDLE_STORAGE_BACKEND`: Either "fs" (default) or "s3"
//!
//! ### For filesystem backend:
//! - `BUNDLE_STORAGE_FS_ROOT`: Root directory for archive storage (default: "./bundles")
//!
//! ### For S3 backend:
//! - `BUNDLE_STORAGE_S3_BUCKET`: S3 bucket name (required)
//! - `BUNDLE_STORAGE_S3_REGION`: S3 region (required)
//! - `BUNDLE_STORAGE_S3_ENDPOINT`: S3 endpoint URL (optional, for S3-compatible services)
//! - `BUNDLE_STORAGE_S3_ACCESS_KEY_ID`: AWS access key ID (optional, uses default credentials if not set)
//! - `BUNDLE_STORAGE_S3_SECRET_ACCESS_KEY`: AWS secret access key (optional)

mod error;

pub use error::{StorageError, StorageResult};

use bon::bon;
use opendal::{Operator, services};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub enum StorageConfig {
    FS {
        root: String,
    },
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::FS {
            root: "./bundles".to_string(),
        }
    }
}

impl StorageConfig {
    /// Create configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `StorageError::MissingEnvVar` if required environment variables
    /// are not set when using S3 backend.
    pub fn from_env() -> StorageResult<Self> {
        let backend = std::env::var("BUNDLE_STORAGE_BACKEND")
            .unwrap_or_else(|_| "fs".to_string())
            .to_lowercase();

        match backend.as_str() {
            "s3" => {
                let bucket = std::env::var("BUNDLE_STORAGE_S3_BUCKET")
                    .map_err(|_| StorageError::missing_env_var("BUNDLE_STORAGE_S3_BUCKET"))?;
                let region = std::env::var("BUNDLE_STORAGE_S3_REGION")
                    .map_err(|_| StorageError::missing_env_var("BUNDLE_STORAGE_S3_REGION"))?;
                let endpoint = std::env::var("BUNDLE_STORAGE_S3_ENDPOINT").ok();
                let access_key_id = std::env::var("BUNDLE_STORAGE_S3_ACCESS_KEY_ID").ok();
                let secret_access_key = std::env::var("BUNDLE_STORAGE_S3_SECRET_ACCESS_KEY").ok();

                Ok(StorageConfig::S3 {
                    bucket,
                    region,
                    endpoint,
                    access_key_id,
                    secret_access_key,
                })
            }
            "fs" => {
                let root = std::env::var("BUNDLE_STORAGE_FS_ROOT")
                    .unwrap_or_else(|_| "./bundles".to_string());
                Ok(StorageConfig::FS { root })
            }
            other => Err(StorageError::configuration(format!(
                "Unknown storage backend '{}'. Use 'fs' or 's3'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageService {
    operator: Operator,
    config: StorageConfig,
}

#[bon]
impl StorageService {
    /// Create a new storage service with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operator cannot be created.
    #[builder]
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        let operator = Self::create_operator(&config)?;
        Ok(Self { operator, config })
    }

    /// Create a new storage service using environment variables for configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the operator cannot be created.
    pub fn from_env() -> StorageResult<Self> {
        let config = StorageConfig::from_env()?;
        info!("Initializing storage service with backend: {}", backend_name(&config));
        Self::builder().config(config).build()
    }

    fn create_operator(config: &StorageConfig) -> StorageResult<Operator> {
        match config {
            StorageConfig::FS { root } => {
                debug!("Creating filesystem storage operator with root: {}", root);

                std::fs::create_dir_all(root)?;

                let builder = services::Fs::default().root(root);

                Ok(Operator::new(builder)?.finish())
            }
            StorageConfig::S3 {
                bucket,
                region,
                endpoint,
                access_key_id,
                secret_access_key,
            } => {
                debug!("Creating S3 storage operator for bucket: {}", bucket);

                let mut builder = services::S3::default().bucket(bucket).region(region);

                if let Some(ep) = endpoint {
                    builder = builder.endpoint(ep);
                }

                if let Some(key_id) = access_key_id {
                    builder = builder.access_key_id(key_id);
                }

                if let Some(secret) = secret_access_key {
                    builder = builder.secret_access_key(secret);
                }

                Ok(Operator::new(builder)?.finish())
            }
        }
    }

    /// Write an archive to storage and return the path it was stored under
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty or the write operation fails.
    pub async fn write(&self, path: &str, content: Vec<u8>) -> StorageResult<String> {
        if path.is_empty() || path.ends_with('/') {
            return Err(StorageError::invalid_path(path));
        }

        debug!("Writing {} bytes to path: {}", content.len(), path);

        self.operator.write(path, content).await?;

        info!("Successfully stored archive at {}", path);

        Ok(path.to_string())
    }

    /// Read an archive from storage
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if nothing is stored at `path`.
    pub async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        debug!("Reading archive from path: {}", path);

        let content = self.operator.read(path).await.map_err(|e| {
            if e.kind() == opendal::ErrorKind::NotFound {
                StorageError::not_found(path)
            } else {
                StorageError::from(e)
            }
        })?;

        let bytes = content.to_vec();

        debug!("Successfully read {} bytes from {}", bytes.len(), path);

        Ok(bytes)
    }

    /// Check if content exists at path
    ///
    /// # Errors
    ///
    /// Returns an error if the stat operation fails (other than NotFound).
    pub async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self.operator.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_backend_name(&self) -> &'static str {
        backend_name(&self.config)
    }
}

fn backend_name(config: &StorageConfig) -> &'static str {
    match config {
        StorageConfig::S3 { .. } => "s3",
        StorageConfig::FS { .. } => "fs",
    }
}
