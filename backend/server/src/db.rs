//! Database layer — migrations and best-effort project mirroring.
//!
//! The in-process registry is authoritative; this module persists snapshots
//! so restarts and direct lookups have something to fall back on. A failed
//! mirror write is logged by the caller, never surfaced to the client.

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::model::Project;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Project snapshots
// ─────────────────────────────────────────────────────────

/// Write the full project snapshot. Indexed columns are duplicated for
/// querying; `payload` carries the complete serialized record.
pub async fn upsert_project(pool: &SqlitePool, project: &Project) -> Result<()> {
    let payload = serde_json::to_string(project)?;
    sqlx::query(
        r#"
        INSERT INTO projects
            (project_id, title, ecosystem_type, area_hectares, status,
             verification_score, carbon_credits, blockchain_tx_hash,
             payload, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(project_id) DO UPDATE SET
            title = excluded.title,
            ecosystem_type = excluded.ecosystem_type,
            area_hectares = excluded.area_hectares,
            status = excluded.status,
            verification_score = excluded.verification_score,
            carbon_credits = excluded.carbon_credits,
            blockchain_tx_hash = excluded.blockchain_tx_hash,
            payload = excluded.payload,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&project.id)
    .bind(&project.name)
    .bind(project.ecosystem.as_str())
    .bind(project.area_hectares)
    .bind(project.status.as_str())
    .bind(project.verification_score as i64)
    .bind(project.carbon_credits)
    .bind(&project.blockchain.tx_hash)
    .bind(payload)
    .bind(project.created_at.to_rfc3339())
    .bind(project.updated_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch one project snapshot by id.
pub async fn get_project(pool: &SqlitePool, project_id: &str) -> Result<Option<Project>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT payload FROM projects WHERE project_id = ?1")
            .bind(project_id)
            .fetch_optional(pool)
            .await?;
    match row {
        Some((payload,)) => Ok(Some(serde_json::from_str(&payload)?)),
        None => Ok(None),
    }
}

/// Fetch project snapshots, newest first.
pub async fn list_projects(pool: &SqlitePool, limit: i64) -> Result<Vec<Project>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT payload FROM projects ORDER BY created_at DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut projects = Vec::with_capacity(rows.len());
    for (payload,) in rows {
        projects.push(serde_json::from_str(&payload)?);
    }
    Ok(projects)
}

// ─────────────────────────────────────────────────────────
// Verification records
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct VerificationRecord {
    pub id: i64,
    pub project_id: String,
    pub verification_type: String,
    pub score: i64,
    pub data: String,
    pub verified_at: String,
}

/// Append one verification record (scoring runs are append-only history).
pub async fn insert_verification_record(
    pool: &SqlitePool,
    project_id: &str,
    verification_type: &str,
    score: u8,
    data: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO verification_records
            (project_id, verification_type, score, data, verified_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(project_id)
    .bind(verification_type)
    .bind(score as i64)
    .bind(data.to_string())
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch verification records for a project, newest first.
pub async fn get_verification_records(
    pool: &SqlitePool,
    project_id: &str,
) -> Result<Vec<VerificationRecord>> {
    let rows = sqlx::query_as::<_, VerificationRecord>(
        r#"
        SELECT id, project_id, verification_type, score, data, verified_at
        FROM   verification_records
        WHERE  project_id = ?1
        ORDER  BY id DESC
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
