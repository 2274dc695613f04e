//! Short ID prefix resolution for CLI commands.
//!
//! Allows users to specify any unique prefix of a task UUID instead of the
//! full ID, similar to git short hashes.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::fmt::Write;
use uuid::Uuid;

const TASK_QUERY: &str = "SELECT id FROM tasks WHERE id LIKE ? ORDER BY created_at";

/// Resolve a task ID prefix to a full UUID.
pub async fn resolve_task_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    // Fast path: a full UUID is returned without a lookup
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }

    validate_prefix(prefix)?;

    let pattern = format!("{}%", prefix.to_lowercase());
    let rows: Vec<(String,)> = sqlx::query_as(TASK_QUERY)
        .bind(&pattern)
        .fetch_all(pool)
        .await?;

    match rows.as_slice() {
        [] => bail!("No task found matching '{prefix}'. Use 'steward list' to see available tasks."),
        [(id,)] => Ok(Uuid::parse_str(id)?),
        _ => {
            let mut msg = format!("Ambiguous prefix '{prefix}': matches {} tasks:", rows.len());
            for (id,) in &rows {
                let _ = write!(msg, "\n  {id}");
            }
            bail!("{msg}")
        }
    }
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("ID prefix must not be empty");
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        bail!("Invalid ID prefix '{prefix}': must contain only hex characters and dashes");
    }
    Ok(())
}
