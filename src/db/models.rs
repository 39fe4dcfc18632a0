use serde::Serialize;

/// Row of the `audit_log` table (migrations/0001_audit_log.sql).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditRow {
    pub id: i64,
    pub endpoint: String,
    pub method: String,
    pub path: String,
    pub status: i64,
    pub duration_ms: f64,
    pub cache_hit: bool,
    pub attempts: i64,
    pub error: Option<String>,
    pub requested_at: i64,
}
