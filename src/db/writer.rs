use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::api::health::HealthState;
use crate::db::models::AuditRow;
use crate::error::Result;
use crate::types::AuditEvent;

/// Receives AuditEvents from the client and persists them to SQLite.
/// Runs as a dedicated background task so request execution never waits on disk.
pub struct AuditWriter {
    pool: sqlx::SqlitePool,
    audit_rx: mpsc::Receiver<AuditEvent>,
    health: Arc<HealthState>,
}

impl AuditWriter {
    pub fn new(pool: sqlx::SqlitePool, audit_rx: mpsc::Receiver<AuditEvent>, health: Arc<HealthState>) -> Self {
        Self { pool, audit_rx, health }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.audit_rx.recv().await {
            match write_event(&self.pool, &event).await {
                Ok(()) => self.health.inc_audit_written(),
                Err(e) => {
                    self.health.inc_audit_errors();
                    error!(endpoint = %event.endpoint, "DB write error: {e}");
                }
            }
        }
    }
}

pub async fn write_event(pool: &sqlx::SqlitePool, e: &AuditEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (
            endpoint, method, path, status, duration_ms,
            cache_hit, attempts, error, requested_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(e.endpoint.name())
    .bind(&e.method)
    .bind(&e.path)
    .bind(i64::from(e.status))
    .bind(e.duration_ms)
    .bind(e.cache_hit)
    .bind(i64::from(e.attempts))
    .bind(e.error.as_deref())
    .bind(e.requested_at_ms)
    .execute(pool)
    .await?;
    Ok(())
}

/// Newest first.
pub async fn recent_events(pool: &sqlx::SqlitePool, limit: i64, endpoint: Option<&str>) -> Result<Vec<AuditRow>> {
    let rows = sqlx::query_as::<_, AuditRow>(
        r#"
        SELECT id, endpoint, method, path, status, duration_ms,
               cache_hit, attempts, error, requested_at
        FROM audit_log
        WHERE (?1 IS NULL OR endpoint = ?1)
        ORDER BY requested_at DESC, id DESC
        LIMIT ?2
        "#,
    )
    .bind(endpoint)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Endpoint;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> sqlx::SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn event(endpoint: Endpoint, at: i64, cache_hit: bool, error: Option<&str>) -> AuditEvent {
        AuditEvent {
            endpoint,
            method: "GET".into(),
            path: endpoint.path().into(),
            status: if error.is_some() { 500 } else { 200 },
            duration_ms: 12.5,
            cache_hit,
            attempts: if cache_hit { 0 } else { 1 },
            error: error.map(String::from),
            requested_at_ms: at,
        }
    }

    #[tokio::test]
    async fn writer_persists_events_from_channel() {
        let pool = pool().await;
        let health = Arc::new(HealthState::new());
        let (tx, rx) = mpsc::channel(8);
        let writer = AuditWriter::new(pool.clone(), rx, Arc::clone(&health));

        tx.send(event(Endpoint::User, 1, false, None)).await.unwrap();
        tx.send(event(Endpoint::Quotes, 2, true, None)).await.unwrap();
        tx.send(event(Endpoint::Fundamentals, 3, false, Some("SERVER_ERROR (500): boom"))).await.unwrap();
        drop(tx);
        writer.run().await;

        assert_eq!(health.audit_rows_written(), 3);
        let rows = recent_events(&pool, 10, None).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].endpoint, "fundamentals");
        assert_eq!(rows[0].status, 500);
        assert_eq!(rows[0].error.as_deref(), Some("SERVER_ERROR (500): boom"));
        assert!(rows[1].cache_hit);
        assert_eq!(rows[1].attempts, 0);
    }

    #[tokio::test]
    async fn recent_events_filters_and_limits() {
        let pool = pool().await;
        for at in 0..5 {
            write_event(&pool, &event(Endpoint::Quotes, at, false, None)).await.unwrap();
        }
        write_event(&pool, &event(Endpoint::Health, 10, false, None)).await.unwrap();

        let quotes = recent_events(&pool, 2, Some("quotes")).await.unwrap();
        assert_eq!(quotes.len(), 2);
        assert!(quotes.iter().all(|r| r.endpoint == "quotes"));
        assert_eq!(quotes[0].requested_at, 4);

        assert_eq!(recent_events(&pool, 100, None).await.unwrap().len(), 6);
    }
}
