use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::debug;

use common::{Result, Snapshot, SnapshotStore};

/// Writes the latest snapshot as pretty JSON, replacing the previous file.
///
/// Saves are serialized and each one lands through a rename, so readers see
/// either the old file or the new one. A snapshot older than the one already
/// on disk is dropped.
pub struct JsonFileStore {
    path: PathBuf,
    last_written: Mutex<Option<DateTime<Utc>>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_written: Mutex::new(None),
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut last_written = self.last_written.lock().await;
        if last_written.is_some_and(|last| snapshot.taken_at < last) {
            debug!(taken_at = %snapshot.taken_at, "Skipping stale snapshot");
            return Ok(());
        }

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_string_pretty(snapshot)?;
        let staging = self.staging_path();
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, &self.path).await?;

        *last_written = Some(snapshot.taken_at);
        debug!(path = %self.path.display(), "Snapshot written");
        Ok(())
    }
}

/// Appends one row per snapshot to the `snapshots` table.
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    /// Connect and run pending migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new().connect(url).await?;
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }

    /// Wrap an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let positions = serde_json::to_string(&snapshot.positions)?;
        let indicators = serde_json::to_string(&snapshot.indicators)?;

        sqlx::query(
            r#"
            INSERT INTO snapshots (taken_at, positions, indicators)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(snapshot.taken_at.to_rfc3339())
        .bind(positions)
        .bind(indicators)
        .execute(&self.pool)
        .await?;

        debug!(taken_at = %snapshot.taken_at, "Snapshot row inserted");
        Ok(())
    }
}
