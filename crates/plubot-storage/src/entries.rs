use super::*;
use rusqlite::{OptionalExtension, params};

pub(super) fn put_entry(
    conn: &Connection,
    key: &str,
    value: &str,
    updated_at: i64,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO kv_entry (key, value, updated_at, byte_size) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at,
            byte_size = excluded.byte_size",
        params![key, value, updated_at, value.len() as i64],
    )?;
    tracing::trace!("Stored {} bytes under {}", value.len(), key);
    Ok(())
}

pub(super) fn get_entry(conn: &Connection, key: &str) -> Result<Option<StoredEntry>, StorageError> {
    let entry = conn
        .query_row(
            "SELECT key, value, updated_at, byte_size FROM kv_entry WHERE key = ?1",
            params![key],
            |row| {
                Ok(StoredEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: row.get(2)?,
                    byte_size: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(entry)
}

pub(super) fn remove_entry(conn: &Connection, key: &str) -> Result<bool, StorageError> {
    let removed = conn.execute("DELETE FROM kv_entry WHERE key = ?1", params![key])?;
    Ok(removed > 0)
}

pub(super) fn keys_with_prefix(conn: &Connection, prefix: &str) -> Result<Vec<String>, StorageError> {
    // substr comparison instead of LIKE so '%' and '_' in keys stay literal.
    let mut stmt = conn.prepare(
        "SELECT key FROM kv_entry WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
    )?;
    let keys = stmt
        .query_map(params![prefix], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}
