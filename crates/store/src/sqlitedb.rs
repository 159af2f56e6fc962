use crate::{Store, StoreError};
use chainyard_types::InstanceRecord;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS instances (
    instance_id TEXT PRIMARY KEY,
    external_id TEXT NOT NULL UNIQUE,
    record      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS instance_metadata (
    instance_id TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    PRIMARY KEY (instance_id, key)
);
";

/// Embedded single-process store. All access is serialized by one mutex;
/// there is no expiry index, so [`Store::get_expired`] always reports
/// nothing and expiry is operator-driven.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`; `:memory:` is accepted.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn load(conn: &Connection, sql: &str, id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        let raw: Option<String> =
            conn.query_row(sql, params![id], |row| row.get(0)).optional()?;
        let Some(raw) = raw else { return Ok(None) };
        let mut record: InstanceRecord = serde_json::from_str(&raw)?;
        record.metadata = Self::metadata(conn, &record.instance_id)?;
        Ok(Some(record))
    }

    fn metadata(
        conn: &Connection,
        instance_id: &str,
    ) -> Result<BTreeMap<String, serde_json::Value>, StoreError> {
        let mut stmt =
            conn.prepare("SELECT key, value FROM instance_metadata WHERE instance_id = ?1")?;
        let rows = stmt.query_map(params![instance_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut metadata = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            metadata.insert(key, serde_json::from_str(&value)?);
        }
        Ok(metadata)
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn register(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let payload = serde_json::to_string(record)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO instances (instance_id, external_id, record) VALUES (?1, ?2, ?3)",
            params![record.instance_id, record.external_id, payload],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists);
        }
        Ok(())
    }

    async fn unregister(&self, instance_id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let record = Self::load(
            &tx,
            "SELECT record FROM instances WHERE instance_id = ?1",
            instance_id,
        )?;
        if record.is_some() {
            tx.execute("DELETE FROM instances WHERE instance_id = ?1", params![instance_id])?;
            tx.execute(
                "DELETE FROM instance_metadata WHERE instance_id = ?1",
                params![instance_id],
            )?;
        }
        tx.commit()?;
        Ok(record)
    }

    async fn get(&self, instance_id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        let conn = self.conn.lock();
        Self::load(&conn, "SELECT record FROM instances WHERE instance_id = ?1", instance_id)
    }

    async fn get_by_external(
        &self,
        external_id: &str,
    ) -> Result<Option<InstanceRecord>, StoreError> {
        let conn = self.conn.lock();
        Self::load(&conn, "SELECT record FROM instances WHERE external_id = ?1", external_id)
    }

    async fn get_expired(&self, _now: u64) -> Result<Vec<InstanceRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn update_metadata(
        &self,
        instance_id: &str,
        patch: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let known: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM instances WHERE instance_id = ?1",
                params![instance_id],
                |row| row.get(0),
            )
            .optional()?;
        if known.is_none() {
            return Err(StoreError::UnknownInstance);
        }
        for (key, value) in patch {
            conn.execute(
                "INSERT INTO instance_metadata (instance_id, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (instance_id, key) DO UPDATE SET value = excluded.value",
                params![instance_id, key, serde_json::to_string(value)?],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainyard_types::{NodeEndpoint, generate_external_id};
    use serde_json::json;

    fn record(instance_id: &str) -> InstanceRecord {
        let mut anvil_instances = BTreeMap::new();
        anvil_instances.insert(
            "main".to_string(),
            NodeEndpoint {
                id: "main".to_string(),
                ip: "172.18.0.2".to_string(),
                port: 8545,
                extra_allowed_methods: None,
            },
        );
        InstanceRecord {
            instance_id: instance_id.to_string(),
            external_id: generate_external_id(),
            created_at: 1_700_000_000,
            expires_at: 1_700_001_800,
            anvil_instances,
            daemon_instances: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn register_get_unregister_roundtrip() {
        let store = SqliteStore::open(":memory:").unwrap();
        let record = record("i1");
        store.register(&record).await.unwrap();

        let fetched = store.get("i1").await.unwrap().unwrap();
        assert_eq!(fetched, record);

        let by_external = store.get_by_external(&record.external_id).await.unwrap().unwrap();
        assert_eq!(by_external.instance_id, "i1");

        let removed = store.unregister("i1").await.unwrap().unwrap();
        assert_eq!(removed.instance_id, "i1");
        assert!(store.get("i1").await.unwrap().is_none());
        assert!(store.get_by_external(&record.external_id).await.unwrap().is_none());
        assert!(store.unregister("i1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_register_fails() {
        let store = SqliteStore::open(":memory:").unwrap();
        store.register(&record("i1")).await.unwrap();
        assert!(matches!(
            store.register(&record("i1")).await,
            Err(StoreError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn metadata_merges_per_key() {
        let store = SqliteStore::open(":memory:").unwrap();
        store.register(&record("i1")).await.unwrap();

        let mut patch = BTreeMap::new();
        patch.insert("challenge".to_string(), json!("hello"));
        patch.insert(
            "contracts".to_string(),
            json!([{"name": "Challenge", "address": "0x0000000000000000000000000000000000000001"}]),
        );
        store.update_metadata("i1", &patch).await.unwrap();

        let mut overwrite = BTreeMap::new();
        overwrite.insert("challenge".to_string(), json!("hello-v2"));
        store.update_metadata("i1", &overwrite).await.unwrap();

        let fetched = store.get("i1").await.unwrap().unwrap();
        assert_eq!(fetched.metadata["challenge"], json!("hello-v2"));
        assert_eq!(fetched.metadata["contracts"][0]["name"], json!("Challenge"));
    }

    #[tokio::test]
    async fn metadata_requires_existing_instance() {
        let store = SqliteStore::open(":memory:").unwrap();
        let mut patch = BTreeMap::new();
        patch.insert("k".to_string(), json!("v"));
        assert!(matches!(
            store.update_metadata("missing", &patch).await,
            Err(StoreError::UnknownInstance)
        ));
    }

    #[tokio::test]
    async fn no_expiry_index() {
        let store = SqliteStore::open(":memory:").unwrap();
        let mut expired = record("old");
        expired.expires_at = 1;
        store.register(&expired).await.unwrap();
        assert!(store.get_expired(u64::MAX).await.unwrap().is_empty());
    }
}
