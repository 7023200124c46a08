use super::*;

const TABLE_STATEMENTS: &[&str] = &["CREATE TABLE IF NOT EXISTS kv_entry (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )"];

const INDEX_STATEMENTS: &[&str] =
    &["CREATE INDEX IF NOT EXISTS idx_kv_entry_updated_at ON kv_entry(updated_at)"];

pub(super) fn create_tables(conn: &Connection) -> Result<(), StorageError> {
    for statement in TABLE_STATEMENTS {
        conn.execute(statement, [])?;
    }
    Ok(())
}

pub(super) fn create_indexes(conn: &Connection) -> Result<(), StorageError> {
    for statement in INDEX_STATEMENTS {
        conn.execute(statement, [])?;
    }
    Ok(())
}

pub(super) fn apply_schema_migrations(storage: &Storage) -> Result<(), StorageError> {
    let stored_version = storage.schema_version()?;

    if stored_version > SCHEMA_VERSION {
        return Err(StorageError::Other(format!(
            "Unsupported database schema version: {stored_version} (max supported: {SCHEMA_VERSION})"
        )));
    }

    if stored_version < 2 {
        tracing::info!("Migrating kv_entry schema from v{} to v2", stored_version);
        migrate_v2_byte_size(&storage.conn)?;
        storage.set_schema_version(2)?;
    }

    if stored_version < SCHEMA_VERSION {
        storage.set_schema_version(SCHEMA_VERSION)?;
    }
    Ok(())
}

pub(super) fn migrate_v2_byte_size(conn: &Connection) -> Result<(), StorageError> {
    try_add_column(conn, "kv_entry", "byte_size INTEGER NOT NULL DEFAULT 0")?;
    conn.execute(
        "UPDATE kv_entry SET byte_size = length(CAST(value AS BLOB)) WHERE byte_size = 0",
        [],
    )?;
    Ok(())
}

pub(super) fn try_add_column(
    conn: &Connection,
    table: &str,
    column_sql: &str,
) -> Result<(), StorageError> {
    let column_name = column_sql
        .split_whitespace()
        .next()
        .ok_or_else(|| StorageError::Other("missing column name in migration".to_string()))?;
    let pragma = format!("PRAGMA table_info({table})");
    let mut stmt = conn.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let existing_name: String = row.get(1)?;
        if existing_name == column_name {
            return Ok(());
        }
    }

    let sql = format!("ALTER TABLE {table} ADD COLUMN {column_sql}");
    conn.execute(&sql, [])?;
    Ok(())
}
