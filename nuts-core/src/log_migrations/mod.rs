//! Log database migrations - embedded SQL files
//!
//! Same layout as the main migrations, applied to logs.duckdb.

/// All log migrations, embedded at compile time.
/// Format: (filename, sql_content)
pub const LOG_MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_sync_events.sql", include_str!("001_sync_events.sql")),
];
