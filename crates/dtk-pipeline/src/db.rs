use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use dtk_config::ProfileConfig;
use dtk_store::{Database, SqliteDatabase};

/// Open the database a profile points at.
///
/// SQLite is the embedded backend; ClickHouse and Postgres profiles parse
/// but have no driver wired up yet, and say so instead of guessing.
pub fn open_database(
    profile: &ProfileConfig,
    project_dir: &Path,
) -> anyhow::Result<Arc<dyn Database>> {
    match profile.db_type.as_str() {
        "sqlite" => {
            let raw = profile
                .path
                .as_deref()
                .context("sqlite profile requires 'path'")?;
            let path = if Path::new(raw).is_absolute() {
                Path::new(raw).to_path_buf()
            } else {
                project_dir.join(raw)
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let db = SqliteDatabase::open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            // query_timeout maps onto SQLite's busy handler.
            db.execute_ddl(&format!(
                "PRAGMA busy_timeout = {}",
                profile.query_timeout.saturating_mul(1000)
            ))?;
            Ok(Arc::new(db))
        }
        other => bail!("database type '{other}' has no driver yet; use a sqlite profile"),
    }
}
