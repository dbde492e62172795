use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::user::Viewer;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub app_mode: String,
    pub database_url: String,
    pub s3_endpoint: String,
    pub s3_public_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_bucket: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub session_user_id: Option<Uuid>,
    pub session_user_email: Option<String>,
    pub upload_max_bytes: usize,
    pub feed_restart_backoff_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "127.0.0.1:8787");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;
        let app_mode = env_or("APP_MODE", "api");

        let session_user_id = match std::env::var("SESSION_USER_ID").ok() {
            Some(value) => Some(
                Uuid::parse_str(&value)
                    .map_err(|err| anyhow!("invalid SESSION_USER_ID: {}", err))?,
            ),
            None => None,
        };

        Ok(Self {
            http_addr,
            app_mode,
            database_url: env_or_err("DATABASE_URL")?,
            s3_endpoint: env_or_err("S3_ENDPOINT")?,
            s3_public_endpoint: std::env::var("S3_PUBLIC_ENDPOINT").ok(),
            s3_region: env_or("S3_REGION", "fr-par"),
            s3_bucket: env_or_err("S3_BUCKET")?,
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "5")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            session_user_id,
            session_user_email: std::env::var("SESSION_USER_EMAIL").ok(),
            upload_max_bytes: env_or_parse("UPLOAD_MAX_BYTES", "10485760")?,
            feed_restart_backoff_ms: env_or_parse("FEED_RESTART_BACKOFF_MS", "1000")?,
        })
    }

    /// The signed-in user, if the session has one.
    pub fn viewer(&self) -> Result<Option<Viewer>> {
        match (self.session_user_id, &self.session_user_email) {
            (Some(id), Some(email)) => Ok(Some(Viewer::new(id, email.clone()))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(anyhow!("SESSION_USER_EMAIL is required with SESSION_USER_ID")),
            (None, Some(_)) => Err(anyhow!("SESSION_USER_ID is required with SESSION_USER_EMAIL")),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}
