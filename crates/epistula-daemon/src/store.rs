// Copyright (c) 2026 Epistula Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use epistula_core::{ExchangeRecord, RecordStore, StoreError};

use crate::payload::IngestPayload;

/// SQLite-backed store for the relay: the unscored-exchange queue the
/// bucket cache drains, the ingest tables, and the trusted-peer allow-list.
///
/// `Connection` is not `Sync`, so all access goes through one mutex. The
/// bucket cache adds its own outer lock around select-and-mark; this one
/// only guards individual statements.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(open_err)?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(open_err)?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn is_trusted_peer(&self, pubkey: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT 1 FROM trusted_peer WHERE pubkey = ?1",
            params![pubkey],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(sql_err)
    }

    pub fn add_trusted_peer(&self, pubkey: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO trusted_peer(pubkey, models) VALUES(?1, '[]')",
            params![pubkey],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    /// Persists one ingest submission: every miner response, the
    /// originating request, and the peer's current model list, in a single
    /// transaction so a failure leaves nothing partial behind.
    pub fn record_ingest(&self, signed_by: &str, payload: &IngestPayload) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(sql_err)?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO peer_response(
                        record_id, pubkey, uid, verified,
                        time_to_first_token, time_for_all_tokens, total_time, tps,
                        tokens, error, cause, organic
                     ) VALUES(?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
                )
                .map_err(sql_err)?;
            for response in &payload.responses {
                let tokens =
                    serde_json::to_string(&response.stats.tokens).map_err(encode_err)?;
                stmt.execute(params![
                    response.record_id,
                    response.pubkey,
                    response.uid,
                    response.stats.verified,
                    response.stats.time_to_first_token,
                    response.stats.time_for_all_tokens,
                    response.stats.total_time,
                    response.stats.tps,
                    tokens,
                    response.stats.error,
                    response.stats.cause,
                    response.stats.organic.unwrap_or(false),
                ])
                .map_err(sql_err)?;
            }
        }

        let request = &payload.request;
        let messages = match (&request.request.messages, &request.request.prompt) {
            (Some(messages), _) => serde_json::to_string(messages).map_err(encode_err)?,
            (None, Some(prompt)) => serde_json::to_string(prompt).map_err(encode_err)?,
            (None, None) => "null".to_string(),
        };
        tx.execute(
            "INSERT INTO submitted_request(
                record_id, block, messages, endpoint, version, pubkey,
                model, seed, max_tokens, temperature
             ) VALUES(?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                request.record_id,
                request.block,
                messages,
                request.endpoint,
                request.version,
                request.pubkey,
                request.request.model,
                request.request.seed,
                request.request.max_tokens,
                request.request.temperature,
            ],
        )
        .map_err(sql_err)?;

        let models = serde_json::to_string(&payload.models).map_err(encode_err)?;
        tx.execute(
            "INSERT INTO trusted_peer(pubkey, models) VALUES(?1, ?2)
             ON CONFLICT(pubkey) DO UPDATE SET models = excluded.models",
            params![signed_by, models],
        )
        .map_err(sql_err)?;

        tx.commit().map_err(sql_err)
    }

    /// Hub-side writer (and tests): queues one exchange for scoring.
    pub fn insert_exchange(
        &self,
        model: &str,
        uid: i64,
        pubkey: &str,
        endpoint: &str,
        success: bool,
        request: &Value,
        response: &Value,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO exchange(model, uid, pubkey, endpoint, success, request, response, scored)
             VALUES(?1,?2,?3,?4,?5,?6,?7,0)",
            params![
                model,
                uid,
                pubkey,
                endpoint,
                success,
                serde_json::to_string(request).map_err(encode_err)?,
                serde_json::to_string(response).map_err(encode_err)?,
            ],
        )
        .map_err(sql_err)?;
        Ok(conn.last_insert_rowid())
    }
}

impl RecordStore for SqliteStore {
    fn select_unscored(
        &self,
        model: &str,
        limit: usize,
    ) -> Result<Vec<ExchangeRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, model, uid, pubkey, endpoint, success, request, response
                 FROM exchange
                 WHERE scored = 0 AND model = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![model, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(sql_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (id, model, uid, pubkey, endpoint, success, request, response) =
                row.map_err(sql_err)?;
            records.push(ExchangeRecord {
                id,
                model,
                uid,
                pubkey,
                endpoint,
                success,
                request: serde_json::from_str(&request).map_err(decode_err)?,
                response: serde_json::from_str(&response).map_err(decode_err)?,
            });
        }
        Ok(records)
    }

    fn mark_scored(&self, ids: &[i64]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(sql_err)?;
        {
            let mut stmt = tx
                .prepare("UPDATE exchange SET scored = 1 WHERE id = ?1")
                .map_err(sql_err)?;
            for id in ids {
                stmt.execute(params![id]).map_err(sql_err)?;
            }
        }
        tx.commit().map_err(sql_err)
    }
}

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;
         CREATE TABLE IF NOT EXISTS exchange(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            model TEXT NOT NULL,
            uid INTEGER NOT NULL,
            pubkey TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            success INTEGER NOT NULL DEFAULT 1,
            request TEXT NOT NULL,
            response TEXT NOT NULL,
            scored INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS exchange_unscored_idx ON exchange(model, scored, id);
         CREATE TABLE IF NOT EXISTS peer_response(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id TEXT NOT NULL,
            pubkey TEXT NOT NULL,
            uid INTEGER NOT NULL,
            verified INTEGER NOT NULL,
            time_to_first_token REAL NOT NULL,
            time_for_all_tokens REAL NOT NULL,
            total_time REAL NOT NULL,
            tps REAL NOT NULL,
            tokens TEXT NOT NULL,
            error TEXT,
            cause TEXT,
            organic INTEGER NOT NULL DEFAULT 0
         );
         CREATE TABLE IF NOT EXISTS submitted_request(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id TEXT NOT NULL,
            block INTEGER NOT NULL,
            messages TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            version INTEGER NOT NULL,
            pubkey TEXT NOT NULL,
            model TEXT NOT NULL,
            seed INTEGER,
            max_tokens INTEGER,
            temperature REAL
         );
         CREATE TABLE IF NOT EXISTS trusted_peer(
            pubkey TEXT PRIMARY KEY,
            models TEXT NOT NULL DEFAULT '[]'
         );",
    )
    .map_err(sql_err)
}

fn open_err(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn sql_err(err: rusqlite::Error) -> StoreError {
    StoreError::Query(err.to_string())
}

fn encode_err(err: serde_json::Error) -> StoreError {
    StoreError::Query(format!("json encode: {err}"))
}

fn decode_err(err: serde_json::Error) -> StoreError {
    StoreError::Query(format!("json decode: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{
        IngestPayload, InferenceRequest, PeerResponse, ResponseStats, SubmittedRequest,
    };
    use serde_json::json;

    fn sample_payload() -> IngestPayload {
        IngestPayload {
            responses: vec![PeerResponse {
                record_id: "r_1".to_string(),
                pubkey: "0xcc".to_string(),
                uid: 4,
                stats: ResponseStats {
                    time_to_first_token: 0.12,
                    time_for_all_tokens: 1.5,
                    total_time: 1.62,
                    tps: 40.0,
                    tokens: vec![json!({"text": "hi"})],
                    verified: true,
                    error: None,
                    cause: None,
                    organic: Some(true),
                },
            }],
            request: SubmittedRequest {
                record_id: "r_1".to_string(),
                block: 100,
                endpoint: "chat".to_string(),
                version: 3,
                pubkey: "0xdd".to_string(),
                request: InferenceRequest {
                    messages: Some(json!([{"role": "user", "content": "hi"}])),
                    prompt: None,
                    model: "modelA".to_string(),
                    seed: Some(1),
                    max_tokens: Some(64),
                    temperature: Some(0.7),
                },
            },
            models: vec!["modelA".to_string()],
        }
    }

    #[test]
    fn select_unscored_respects_limit_and_mark_scored_is_permanent() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..30 {
            store
                .insert_exchange(
                    "modelA",
                    i,
                    "0xaa",
                    "chat",
                    true,
                    &json!({"model": "modelA"}),
                    &json!([]),
                )
                .unwrap();
        }

        let batch = store.select_unscored("modelA", 20).unwrap();
        assert_eq!(batch.len(), 20);
        // Newest first.
        assert!(batch.windows(2).all(|w| w[0].id > w[1].id));

        let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
        store.mark_scored(&ids).unwrap();

        let rest = store.select_unscored("modelA", 20).unwrap();
        assert_eq!(rest.len(), 10);
        for record in &rest {
            assert!(!ids.contains(&record.id));
        }
    }

    #[test]
    fn select_unscored_filters_by_model() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_exchange("modelA", 1, "0xaa", "chat", true, &json!({}), &json!([]))
            .unwrap();
        store
            .insert_exchange("modelB", 2, "0xaa", "chat", true, &json!({}), &json!([]))
            .unwrap();

        let batch = store.select_unscored("modelB", 10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].model, "modelB");
    }

    #[test]
    fn trusted_peer_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.is_trusted_peer("0xdd").unwrap());
        store.add_trusted_peer("0xdd").unwrap();
        assert!(store.is_trusted_peer("0xdd").unwrap());
    }

    #[test]
    fn record_ingest_writes_all_tables_and_refreshes_models() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_trusted_peer("0xdd").unwrap();
        store.record_ingest("0xdd", &sample_payload()).unwrap();

        let conn = store.conn.lock();
        let responses: i64 = conn
            .query_row("SELECT COUNT(*) FROM peer_response", [], |r| r.get(0))
            .unwrap();
        assert_eq!(responses, 1);
        let requests: i64 = conn
            .query_row("SELECT COUNT(*) FROM submitted_request", [], |r| r.get(0))
            .unwrap();
        assert_eq!(requests, 1);
        let models: String = conn
            .query_row(
                "SELECT models FROM trusted_peer WHERE pubkey = '0xdd'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(models, r#"["modelA"]"#);
    }
}
