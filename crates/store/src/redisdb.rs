use crate::{Store, StoreError};
use chainyard_types::InstanceRecord;
use redis::AsyncCommands;
use std::collections::{BTreeMap, HashMap};

const EXTERNAL_IDS: &str = "external_ids";
const EXPIRIES: &str = "expiries";

fn record_key(instance_id: &str) -> String {
    format!("instance/{instance_id}")
}

fn metadata_key(instance_id: &str) -> String {
    format!("metadata/{instance_id}")
}

/// Networked store used in production. Records live under `instance/<id>`,
/// the handle index in the `external_ids` hash, the expiry index in the
/// `expiries` sorted set scored by `expires_at`, and metadata in a
/// `metadata/<id>` hash of JSON-encoded values.
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl Store for RedisStore {
    async fn register(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = record_key(&record.instance_id);
        let payload = serde_json::to_string(record)?;

        // uniqueness is decided by the NX writes inside the transaction, so
        // two racing registrations cannot both think they won
        let (created, handle_claimed, _): (bool, bool, i64) = redis::pipe()
            .atomic()
            .set_nx(&key, payload)
            .hset_nx(EXTERNAL_IDS, &record.external_id, &record.instance_id)
            .cmd("ZADD")
            .arg(EXPIRIES)
            .arg("NX")
            .arg(record.expires_at as i64)
            .arg(&record.instance_id)
            .query_async(&mut conn)
            .await?;
        if created && handle_claimed {
            return Ok(());
        }

        // lost a registration race: undo whichever writes this attempt won
        if created || handle_claimed {
            let mut undo = redis::pipe();
            undo.atomic();
            if created {
                undo.del(&key).ignore();
                undo.zrem(EXPIRIES, &record.instance_id).ignore();
            }
            if handle_claimed {
                undo.hdel(EXTERNAL_IDS, &record.external_id).ignore();
            }
            let _: () = undo.query_async(&mut conn).await?;
        }
        Err(StoreError::AlreadyExists)
    }

    async fn unregister(&self, instance_id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        let Some(record) = self.get(instance_id).await? else {
            return Ok(None);
        };

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(record_key(instance_id))
            .ignore()
            .hdel(EXTERNAL_IDS, &record.external_id)
            .ignore()
            .zrem(EXPIRIES, instance_id)
            .ignore()
            .del(metadata_key(instance_id))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(Some(record))
    }

    async fn get(&self, instance_id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(record_key(instance_id)).await?;
        let Some(raw) = raw else { return Ok(None) };
        let mut record: InstanceRecord = serde_json::from_str(&raw)?;

        let metadata: HashMap<String, String> = conn.hgetall(metadata_key(instance_id)).await?;
        record.metadata = BTreeMap::new();
        for (key, value) in metadata {
            record.metadata.insert(key, serde_json::from_str(&value)?);
        }
        Ok(Some(record))
    }

    async fn get_by_external(
        &self,
        external_id: &str,
    ) -> Result<Option<InstanceRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let instance_id: Option<String> = conn.hget(EXTERNAL_IDS, external_id).await?;
        match instance_id {
            Some(instance_id) => self.get(&instance_id).await,
            None => Ok(None),
        }
    }

    async fn get_expired(&self, now: u64) -> Result<Vec<InstanceRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let instance_ids: Vec<String> =
            conn.zrangebyscore(EXPIRIES, "-inf", now as i64).await?;

        let mut expired = Vec::with_capacity(instance_ids.len());
        for instance_id in instance_ids {
            if let Some(record) = self.get(&instance_id).await? {
                expired.push(record);
            }
        }
        Ok(expired)
    }

    async fn update_metadata(
        &self,
        instance_id: &str,
        patch: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let known: bool = conn.exists(record_key(instance_id)).await?;
        if !known {
            return Err(StoreError::UnknownInstance);
        }

        let key = metadata_key(instance_id);
        let mut pipe = redis::pipe();
        for (field, value) in patch {
            pipe.hset(&key, field, serde_json::to_string(value)?).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
