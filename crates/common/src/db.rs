use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Connect to the audit database and apply pending migrations.
///
/// `max_connections` comes from `AppConfig::db_max_connections` (default 5);
/// the audit trail only sees one insert per reprocessing run.
pub async fn connect_audit_db(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;

    tracing::info!(max_connections, "Connected to audit database, migrations applied");
    Ok(pool)
}
