use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Default directory for the local storage backend.
pub const DEFAULT_LOCAL_DIR: &str = "./data/objects";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackendKind {
    #[default]
    Local,
    S3,
}

impl FromStr for StorageBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" => Ok(StorageBackendKind::Local),
            "s3" | "minio" => Ok(StorageBackendKind::S3),
            other => anyhow::bail!("unknown storage backend '{}' (expected local|s3)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    pub local_dir: PathBuf,
    pub s3: S3Config,
}

#[derive(Clone)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("path_style", &self.path_style)
            .finish_non_exhaustive()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Local,
            local_dir: PathBuf::from(DEFAULT_LOCAL_DIR),
            s3: S3Config::default(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            bucket: "chainvault".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            path_style: false,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => StorageBackendKind::default(),
        };

        Ok(Self {
            backend,
            local_dir: env::var("STORAGE_LOCAL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOCAL_DIR)),
            s3: S3Config::from_env(),
        })
    }

    /// Local backend rooted at `dir`
    pub fn local(dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendKind::Local,
            local_dir: dir.into(),
            s3: S3Config::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self.backend {
            StorageBackendKind::Local => {
                if self.local_dir.as_os_str().is_empty() {
                    anyhow::bail!("STORAGE_LOCAL_DIR cannot be empty");
                }
            },
            StorageBackendKind::S3 => {
                if self.s3.bucket.is_empty() {
                    anyhow::bail!("S3_BUCKET cannot be empty");
                }
                if self.s3.access_key.is_empty() || self.s3.secret_key.is_empty() {
                    anyhow::bail!("S3 credentials are required for the s3 storage backend");
                }
            },
        }
        Ok(())
    }
}

impl S3Config {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "chainvault".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_default(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_default(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}
