use std::{path::PathBuf, str::FromStr};

use secrecy::SecretString;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub ttl_minutes: i64,
    pub max_attempts: i32,
}

/// SMTP settings. When absent, outgoing mail is written to the log instead.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: SecretString,
    pub api_base: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub max_file_size: usize,
    pub max_files_per_upload: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub top_k: usize,
    pub threshold: f32,
    pub max_results: usize,
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local {
        root: PathBuf,
    },
    S3 {
        endpoint: String,
        bucket: String,
        access_key: String,
        secret_key: SecretString,
        region: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub smtp: Option<SmtpConfig>,
    pub embedding: EmbeddingConfig,
    pub ingest: IngestConfig,
    pub search: SearchConfig,
    pub storage: StorageConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "docvault".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "docvault-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };
        let otp = OtpConfig {
            ttl_minutes: env_or("OTP_TTL_MINUTES", 10),
            max_attempts: env_or("OTP_MAX_ATTEMPTS", 5),
        };

        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpConfig {
                host,
                port: env_or("SMTP_PORT", 587),
                username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
                password: SecretString::new(std::env::var("SMTP_PASSWORD").unwrap_or_default()),
                from: std::env::var("SMTP_FROM")
                    .unwrap_or_else(|_| "Docvault <no-reply@docvault.local>".into()),
            }),
            _ => None,
        };

        let embedding = EmbeddingConfig {
            api_key: SecretString::new(std::env::var("EMBEDDING_API_KEY").unwrap_or_default()),
            api_base: std::env::var("EMBEDDING_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".into()),
            dimensions: env_or("EMBEDDING_DIMENSIONS", 1536),
            batch_size: env_or("EMBEDDING_BATCH_SIZE", 64usize).max(1),
            max_retries: env_or("EMBEDDING_MAX_RETRIES", 3u32).max(1),
            timeout_secs: env_or("EMBEDDING_TIMEOUT_SECS", 30),
        };

        let ingest = IngestConfig {
            max_file_size: env_or("MAX_FILE_SIZE", 10 * 1024 * 1024),
            max_files_per_upload: env_or("MAX_FILES_PER_UPLOAD", 10),
            chunk_size: env_or("CHUNK_SIZE", 2000usize).max(1),
            chunk_overlap: env_or("CHUNK_OVERLAP", 200),
        };

        let search = SearchConfig {
            top_k: env_or("SEARCH_TOP_K", 5),
            threshold: env_or("SEARCH_THRESHOLD", 0.3),
            max_results: env_or("SEARCH_MAX_RESULTS", 10),
        };

        let storage = match std::env::var("STORAGE_BACKEND").as_deref() {
            Ok("s3") => StorageConfig::S3 {
                endpoint: std::env::var("MINIO_ENDPOINT")?,
                bucket: std::env::var("MINIO_BUCKET")?,
                access_key: std::env::var("MINIO_ACCESS_KEY")?,
                secret_key: SecretString::new(std::env::var("MINIO_SECRET_KEY")?),
                region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".into()),
            },
            _ => StorageConfig::Local {
                root: std::env::var("UPLOAD_DIR")
                    .unwrap_or_else(|_| "data/uploads".into())
                    .into(),
            },
        };

        Ok(Self {
            database_url,
            jwt,
            otp,
            smtp,
            embedding,
            ingest,
            search,
            storage,
        })
    }
}
