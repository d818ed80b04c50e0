use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::domain::{OrganizationProfile, Session};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

use crate::{
    decode_entry, is_fresh, CachedCredentials, CredentialStore, PROFILE_KEY, SESSION_KEY,
};

#[derive(Clone)]
pub struct SqliteCredentialStore {
    pool: Pool<Sqlite>,
    max_age: Option<Duration>,
}

impl SqliteCredentialStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid credential cache url '{database_url}'"))?
            .create_if_missing(true);
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            4
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open credential cache '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to migrate credential cache schema")?;
        Ok(Self {
            pool,
            max_age: None,
        })
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn sqlite_url_for_data_dir(data_dir: &Path) -> String {
        format!(
            "sqlite://{}",
            data_dir
                .join("credentials.db")
                .to_string_lossy()
                .replace('\\', "/")
        )
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn read_entry(&self, key: &str) -> Result<Option<(String, DateTime<Utc>)>> {
        let row = sqlx::query("SELECT value, updated_at FROM credential_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read credential cache entry '{key}'"))?;
        row.map(|row| -> Result<(String, DateTime<Utc>)> {
            Ok((row.try_get("value")?, row.try_get("updated_at")?))
        })
        .transpose()
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load(&self) -> Result<CachedCredentials> {
        let now = Utc::now();
        let mut loaded = CachedCredentials::default();

        if let Some((raw, updated_at)) = self.read_entry(SESSION_KEY).await? {
            if is_fresh(updated_at, self.max_age, now) {
                loaded.session = decode_entry::<Session>(SESSION_KEY, &raw);
                if loaded.session.is_some() {
                    loaded.saved_at = Some(updated_at);
                }
            } else {
                tracing::debug!(key = SESSION_KEY, %updated_at, "credential cache entry expired");
            }
        }

        if let Some((raw, updated_at)) = self.read_entry(PROFILE_KEY).await? {
            if is_fresh(updated_at, self.max_age, now) {
                loaded.profile = decode_entry::<OrganizationProfile>(PROFILE_KEY, &raw);
                if loaded.profile.is_some() {
                    loaded.saved_at = loaded.saved_at.max(Some(updated_at));
                }
            } else {
                tracing::debug!(key = PROFILE_KEY, %updated_at, "credential cache entry expired");
            }
        }

        Ok(loaded)
    }

    async fn save(
        &self,
        session: Option<&Session>,
        profile: Option<&OrganizationProfile>,
    ) -> Result<()> {
        let now = Utc::now();
        let entries = [
            (
                SESSION_KEY,
                session
                    .map(serde_json::to_string)
                    .transpose()
                    .context("failed to encode cached session")?,
            ),
            (
                PROFILE_KEY,
                profile
                    .map(serde_json::to_string)
                    .transpose()
                    .context("failed to encode cached profile")?,
            ),
        ];

        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            match value {
                Some(value) => {
                    sqlx::query(
                        "INSERT INTO credential_cache (key, value, updated_at) VALUES (?, ?, ?)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    )
                    .bind(key)
                    .bind(value)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("failed to write credential cache entry '{key}'"))?;
                }
                None => {
                    sqlx::query("DELETE FROM credential_cache WHERE key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                        .with_context(|| {
                            format!("failed to remove credential cache entry '{key}'")
                        })?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM credential_cache WHERE key IN (?, ?)")
            .bind(SESSION_KEY)
            .bind(PROFILE_KEY)
            .execute(&self.pool)
            .await
            .context("failed to clear credential cache")?;
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
