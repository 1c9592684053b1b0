use crate::db::connection::DbPool;
use crate::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

pub fn migrate(pool: &DbPool) -> Result<()> {
    tracing::debug!("[DB] Ensuring job store schema");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    Ok(())
}
