use super::*;

#[test]
fn test_put_get_roundtrip() -> Result<(), StorageError> {
    let storage = Storage::new_in_memory()?;
    storage.put("plubot:flow:p1", "{\"nodes\":[]}")?;

    let entry = storage.get("plubot:flow:p1")?.expect("entry stored");
    assert_eq!(entry.value, "{\"nodes\":[]}");
    assert_eq!(entry.byte_size, 12);
    assert!(entry.updated_at > 0);
    assert!(storage.get("plubot:flow:missing")?.is_none());
    Ok(())
}

#[test]
fn test_put_overwrites_existing_value() -> Result<(), StorageError> {
    let storage = Storage::new_in_memory()?;
    storage.put("k", "first")?;
    storage.put("k", "second value")?;

    let entry = storage.get("k")?.expect("entry stored");
    assert_eq!(entry.value, "second value");
    assert_eq!(entry.byte_size, 12);
    assert_eq!(storage.get_stats()?.entry_count, 1);
    Ok(())
}

#[test]
fn test_remove_reports_whether_entry_existed() -> Result<(), StorageError> {
    let storage = Storage::new_in_memory()?;
    storage.put("k", "v")?;
    assert!(storage.remove("k")?);
    assert!(!storage.remove("k")?);
    assert!(storage.get("k")?.is_none());
    Ok(())
}

#[test]
fn test_prefix_listing_treats_wildcards_literally() -> Result<(), StorageError> {
    let storage = Storage::new_in_memory()?;
    storage.put("plubot:backup:p_1", "a")?;
    storage.put("plubot:backup:p_1:old", "b")?;
    storage.put("plubot:backup:px1", "c")?;
    storage.put("plubot:flow:p_1", "d")?;

    let keys = storage.keys_with_prefix("plubot:backup:p_1")?;
    assert_eq!(keys, vec!["plubot:backup:p_1", "plubot:backup:p_1:old"]);
    Ok(())
}

#[test]
fn test_stats_track_writes_and_removals() -> Result<(), StorageError> {
    let storage = Storage::new_in_memory()?;
    storage.put("a", "1234")?;
    storage.put("b", "56")?;

    let stats = storage.get_stats()?;
    assert_eq!(stats.entry_count, 2);
    assert_eq!(stats.total_bytes, 6);

    storage.remove("a")?;
    let stats = storage.get_stats()?;
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.total_bytes, 2);
    Ok(())
}

#[test]
fn test_schema_version_is_current() -> Result<(), StorageError> {
    let storage = Storage::new_in_memory()?;
    assert_eq!(storage.schema_version()?, SCHEMA_VERSION);

    let mut stmt = storage.conn.prepare("PRAGMA index_list('kv_entry')")?;
    let indexes = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    assert!(indexes.iter().any(|name| name == "idx_kv_entry_updated_at"));
    Ok(())
}

#[test]
fn test_migration_backfills_byte_size() -> Result<(), StorageError> {
    let dir = tempfile::tempdir().map_err(|e| StorageError::Other(e.to_string()))?;
    let path = dir.path().join("plubot.db");

    {
        let conn = Connection::open(&path)?;
        conn.execute(
            "CREATE TABLE kv_entry (key TEXT PRIMARY KEY, value TEXT NOT NULL, updated_at INTEGER NOT NULL)",
            [],
        )?;
        conn.execute(
            "INSERT INTO kv_entry (key, value, updated_at) VALUES ('legacy', 'abcd', 7)",
            [],
        )?;
    }

    let storage = Storage::open(&path)?;
    let entry = storage.get("legacy")?.expect("legacy entry survives");
    assert_eq!(entry.byte_size, 4);
    assert_eq!(entry.updated_at, 7);
    assert_eq!(storage.schema_version()?, SCHEMA_VERSION);
    Ok(())
}

#[test]
fn test_newer_schema_is_rejected() -> Result<(), StorageError> {
    let dir = tempfile::tempdir().map_err(|e| StorageError::Other(e.to_string()))?;
    let path = dir.path().join("future.db");
    {
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "user_version", (SCHEMA_VERSION + 1).to_string())?;
    }

    match Storage::open(&path) {
        Err(StorageError::Other(message)) => assert!(message.contains("Unsupported")),
        other => panic!("expected schema rejection, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[test]
fn test_data_persists_across_reopen() -> Result<(), StorageError> {
    let dir = tempfile::tempdir().map_err(|e| StorageError::Other(e.to_string()))?;
    let path = dir.path().join("plubot.db");
    {
        let storage = Storage::open(&path)?;
        storage.put("plubot:flow:p1", "saved")?;
    }
    let storage = Storage::open(&path)?;
    assert_eq!(storage.get("plubot:flow:p1")?.map(|e| e.value), Some("saved".to_string()));
    Ok(())
}
