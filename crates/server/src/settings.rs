use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::info;
use vidslim_core::config::{ConfigError, RuntimeSettings};
use vidslim_scanner::ignore::IgnoreMatcher;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Holds the live settings. Readers get an `Arc` snapshot that stays valid
/// for as long as they keep it, regardless of later updates.
#[derive(Clone)]
pub struct SettingsManager {
    pool: SqlitePool,
    current: Arc<RwLock<Arc<RuntimeSettings>>>,
}

impl SettingsManager {
    /// Merge defaults, `env` and the persisted rows, then validate.
    pub async fn load<F>(pool: SqlitePool, env: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let persisted = vidslim_db::repo::settings::get_all(&pool).await?;
        let settings = RuntimeSettings::load(env, persisted)?;
        Ok(Self::with_settings(pool, settings))
    }

    pub fn with_settings(pool: SqlitePool, settings: RuntimeSettings) -> Self {
        Self {
            pool,
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    pub async fn current(&self) -> Arc<RuntimeSettings> {
        self.current.read().await.clone()
    }

    /// Validate `updates` against the current settings, persist them and
    /// swap them in. Nothing changes if validation or the write fails.
    pub async fn update(
        &self,
        updates: &[(String, String)],
    ) -> Result<Arc<RuntimeSettings>, SettingsError> {
        let mut guard = self.current.write().await;
        let candidate = guard.with_updates(updates)?;
        check_ignore_patterns(&candidate)?;

        // Store the normalized form so a reload parses to the same value.
        let rows: Vec<(String, String)> = updates
            .iter()
            .filter_map(|(key, _)| candidate.get(key).map(|v| (key.clone(), v)))
            .collect();
        vidslim_db::repo::settings::set_many(&self.pool, &rows).await?;

        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        info!(keys = ?keys, "settings updated");

        let candidate = Arc::new(candidate);
        *guard = candidate.clone();
        Ok(candidate)
    }

    /// Settings as they would be after `updates`, without saving anything.
    pub async fn preview(&self, updates: &[(String, String)]) -> Result<RuntimeSettings, ConfigError> {
        let candidate = self.current.read().await.with_updates(updates)?;
        check_ignore_patterns(&candidate)?;
        Ok(candidate)
    }
}

/// Every ignore pattern has to compile, or each later scan would fail on it.
fn check_ignore_patterns(settings: &RuntimeSettings) -> Result<(), ConfigError> {
    IgnoreMatcher::new(&settings.ignore_patterns())
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidValue {
            key: "scan_ignore_patterns".into(),
            message: e.to_string(),
        })
}
