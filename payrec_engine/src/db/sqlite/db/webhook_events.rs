use chrono::Duration;
use sqlx::SqliteConnection;

/// True when the event id is recorded and its retention window has not passed.
pub async fn already_processed(event_id: &str, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let seen: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM webhook_events WHERE event_id = $1 AND expires_at > CURRENT_TIMESTAMP)",
    )
    .bind(event_id)
    .fetch_one(conn)
    .await?;
    Ok(seen)
}

/// Set-if-not-exists insert of a processed-event marker. Returns false when the id was already recorded.
pub async fn mark_processed(
    event_id: &str,
    gateway: &str,
    event_type: &str,
    ttl: Duration,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let expiry_modifier = format!("+{} seconds", ttl.num_seconds());
    let result = sqlx::query(
        "INSERT OR IGNORE INTO webhook_events (event_id, gateway, event_type, expires_at) VALUES ($1, $2, $3, \
         datetime(CURRENT_TIMESTAMP, $4))",
    )
    .bind(event_id)
    .bind(gateway)
    .bind(event_type)
    .bind(expiry_modifier)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Deletes markers whose retention window has passed, returning the number removed.
pub async fn purge_expired(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM webhook_events WHERE expires_at <= CURRENT_TIMESTAMP").execute(conn).await?;
    Ok(result.rows_affected())
}
