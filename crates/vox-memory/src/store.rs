//! The memory store: durable turn log plus similarity retrieval.
//!
//! `append` assigns monotonic turn ids, embeds the text once, and persists
//! with bounded retry; turns that outlive the retry budget wait in an
//! in-memory overflow buffer and are retried on the next append or flush,
//! never dropped. `query` is best-effort: any failure degrades to an empty
//! result set rather than an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::OptionalExtension;
use tracing::{debug, warn};
use uuid::Uuid;

use vox_core::config::MemoryConfig;
use vox_core::error::VoxError;
use vox_core::types::{ActionRecord, Role, Timestamp, Turn, TurnId};

use crate::db::Database;
use crate::embedding::DynEmbeddingService;
use crate::index::VectorIndex;

/// One similarity-retrieval result: a stored turn and its score.
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub turn: Turn,
    pub score: f64,
}

/// Durable, semantically-searchable conversation memory.
///
/// Appends are serialized per database (the connection mutex is the write
/// path); queries never mutate the store.
pub struct MemoryStore {
    db: Arc<Database>,
    index: VectorIndex,
    embedder: Arc<dyn DynEmbeddingService>,
    /// Turns that exhausted their retry budget, oldest first.
    overflow: Mutex<Vec<Turn>>,
    /// Highest assigned turn_id per session.
    last_ids: Mutex<HashMap<Uuid, u64>>,
    retries: u32,
    backoff: Duration,
}

impl MemoryStore {
    /// Open a store over the given database, rebuilding the similarity
    /// index and per-session id counters from the persisted log.
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn DynEmbeddingService>,
        config: &MemoryConfig,
    ) -> Result<Self, VoxError> {
        let index = VectorIndex::new();
        let last_ids = load_last_ids(&db)?;
        load_index(&db, &index)?;

        Ok(Self {
            db,
            index,
            embedder,
            overflow: Mutex::new(Vec::new()),
            last_ids: Mutex::new(last_ids),
            retries: config.append_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// Persist a turn, returning its assigned id.
    ///
    /// Idempotent when called again with an already-assigned turn_id
    /// (detected by id, not content). The embedding is computed here,
    /// exactly once; if the embedding service fails the turn is stored
    /// without one and stays out of similarity results.
    ///
    /// Transient persistence failures are retried `append_retries` times
    /// with backoff; after exhaustion the turn moves to the overflow
    /// buffer and `StorageError` is returned, but the turn is not lost.
    pub async fn append(&self, mut turn: Turn) -> Result<TurnId, VoxError> {
        // Older buffered turns go first so the log stays ordered.
        self.drain_overflow();

        // Idempotence check by id.
        if let Some(id) = turn.turn_id {
            if self.exists(turn.session_id, id).unwrap_or(false) {
                debug!(session = %turn.session_id, turn = %id, "Turn already persisted");
                return Ok(id);
            }
            self.reserve_at_least(turn.session_id, id.0)?;
        }

        let id = match turn.turn_id {
            Some(id) => id,
            None => self.next_id(turn.session_id)?,
        };
        turn.turn_id = Some(id);

        // Computed exactly once: a failed embedding is never retried and a
        // present one is never replaced.
        if turn.embedding.is_none() {
            match self.embedder.embed_boxed(&turn.text).await {
                Ok(vector) => turn.embedding = Some(vector),
                Err(e) => {
                    warn!(error = %e, session = %turn.session_id, turn = %id,
                        "Embedding failed; storing turn without one");
                }
            }
        }

        let mut attempt = 0u32;
        loop {
            match self.persist(&turn) {
                Ok(()) => {
                    if let Some(ref vector) = turn.embedding {
                        let _ = self.index.insert(turn.session_id, id, vector.clone());
                    }
                    return Ok(id);
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Turn persist failed; retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    warn!(error = %e, session = %turn.session_id, turn = %id,
                        "Persist retries exhausted; buffering turn");
                    if let Ok(mut buf) = self.overflow.lock() {
                        buf.push(turn);
                    }
                    return Err(VoxError::Storage(format!(
                        "turn buffered after {} failed attempts: {}",
                        attempt + 1,
                        e
                    )));
                }
            }
        }
    }

    /// Similarity search restricted to one session.
    ///
    /// Returns at most `top_k` stored turns ordered by descending score,
    /// ties broken toward the more recent turn. Never errors: an empty
    /// store, a failed embedding, or a storage fault all yield an empty
    /// result set, since retrieval is best-effort context.
    pub async fn query(&self, text: &str, top_k: usize, session_id: Uuid) -> Vec<MemoryHit> {
        if top_k == 0 {
            return Vec::new();
        }

        let query_vector = match self.embedder.embed_boxed(text).await {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Query embedding failed; returning no memory context");
                return Vec::new();
            }
        };

        let hits = match self.index.search(session_id, &query_vector, top_k) {
            Ok(hits) => hits,
            Err(e) => {
                debug!(error = %e, "Index search failed; returning no memory context");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.turn(session_id, hit.turn_id) {
                Ok(Some(turn)) => results.push(MemoryHit {
                    turn,
                    score: hit.score,
                }),
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "Failed to hydrate turn; dropping hit");
                }
            }
        }
        results
    }

    /// Make all appended turns durable before returning.
    ///
    /// Drains the overflow buffer, then checkpoints the write-ahead log
    /// while holding the write path. Called at session teardown and on the
    /// configured interval.
    pub fn flush(&self) -> Result<(), VoxError> {
        let remaining = self.drain_overflow();
        if remaining > 0 {
            return Err(VoxError::Storage(format!(
                "{} turns still buffered after flush",
                remaining
            )));
        }

        self.db.with_conn(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(FULL);")
                .map_err(|e| VoxError::Storage(format!("Checkpoint failed: {}", e)))
        })
    }

    /// Load one stored turn by id.
    pub fn turn(&self, session_id: Uuid, turn_id: TurnId) -> Result<Option<Turn>, VoxError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT turn_id, timestamp, role, text, embedding, action_json
                     FROM turns WHERE session_id = ?1 AND turn_id = ?2",
                )
                .map_err(|e| VoxError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(
                    rusqlite::params![session_id.to_string(), turn_id.0 as i64],
                    |row| Ok(row_to_turn(session_id, row)),
                )
                .optional()
                .map_err(|e| VoxError::Storage(e.to_string()))?;

            match result {
                Some(turn) => Ok(Some(turn?)),
                None => Ok(None),
            }
        })
    }

    /// Count of persisted turns in one session.
    pub fn session_len(&self, session_id: Uuid) -> Result<u64, VoxError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
                    rusqlite::params![session_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| VoxError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    // -- Private helpers --

    /// Retry buffered turns, oldest first. Returns how many remain.
    fn drain_overflow(&self) -> usize {
        let pending = match self.overflow.lock() {
            Ok(mut buf) if !buf.is_empty() => std::mem::take(&mut *buf),
            _ => return 0,
        };

        let mut kept = Vec::new();
        for turn in pending {
            match self.persist(&turn) {
                Ok(()) => {
                    if let (Some(id), Some(vector)) = (turn.turn_id, turn.embedding.as_ref()) {
                        let _ = self.index.insert(turn.session_id, id, vector.clone());
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Buffered turn still not persistable");
                    kept.push(turn);
                }
            }
        }

        let remaining = kept.len();
        if remaining > 0 {
            if let Ok(mut buf) = self.overflow.lock() {
                // Anything buffered meanwhile is newer; keep order.
                let newer = std::mem::take(&mut *buf);
                *buf = kept;
                buf.extend(newer);
            }
        }
        remaining
    }

    fn next_id(&self, session_id: Uuid) -> Result<TurnId, VoxError> {
        let mut ids = self
            .last_ids
            .lock()
            .map_err(|e| VoxError::Storage(format!("Id counter lock poisoned: {}", e)))?;
        let last = ids.entry(session_id).or_insert(0);
        *last += 1;
        Ok(TurnId(*last))
    }

    /// Keep the id counter ahead of caller-assigned ids.
    fn reserve_at_least(&self, session_id: Uuid, id: u64) -> Result<(), VoxError> {
        let mut ids = self
            .last_ids
            .lock()
            .map_err(|e| VoxError::Storage(format!("Id counter lock poisoned: {}", e)))?;
        let last = ids.entry(session_id).or_insert(0);
        if *last < id {
            *last = id;
        }
        Ok(())
    }

    fn exists(&self, session_id: Uuid, turn_id: TurnId) -> Result<bool, VoxError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM turns WHERE session_id = ?1 AND turn_id = ?2",
                    rusqlite::params![session_id.to_string(), turn_id.0 as i64],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| VoxError::Storage(e.to_string()))?;
            Ok(found.is_some())
        })
    }

    fn persist(&self, turn: &Turn) -> Result<(), VoxError> {
        let turn_id = turn
            .turn_id
            .ok_or_else(|| VoxError::Storage("Cannot persist unassigned turn".to_string()))?;
        let action_json = match &turn.action {
            Some(record) => Some(serde_json::to_string(record)?),
            None => None,
        };
        let embedding_blob = turn.embedding.as_deref().map(encode_embedding);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO turns
                    (session_id, turn_id, timestamp, role, text, embedding, action_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    turn.session_id.to_string(),
                    turn_id.0 as i64,
                    turn.timestamp.0,
                    turn.role.to_string(),
                    turn.text,
                    embedding_blob,
                    action_json,
                ],
            )
            .map_err(|e| VoxError::Storage(format!("Failed to persist turn: {}", e)))?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("indexed", &self.index.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Row mapping and startup loading
// ---------------------------------------------------------------------------

fn row_to_turn(session_id: Uuid, row: &rusqlite::Row<'_>) -> Result<Turn, VoxError> {
    let turn_id: i64 = row.get(0).map_err(|e| VoxError::Storage(e.to_string()))?;
    let timestamp: i64 = row.get(1).map_err(|e| VoxError::Storage(e.to_string()))?;
    let role: String = row.get(2).map_err(|e| VoxError::Storage(e.to_string()))?;
    let text: String = row.get(3).map_err(|e| VoxError::Storage(e.to_string()))?;
    let embedding: Option<Vec<u8>> = row.get(4).map_err(|e| VoxError::Storage(e.to_string()))?;
    let action_json: Option<String> = row.get(5).map_err(|e| VoxError::Storage(e.to_string()))?;

    let role: Role = role.parse().map_err(VoxError::Storage)?;
    let action: Option<ActionRecord> = match action_json {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };

    Ok(Turn {
        turn_id: Some(TurnId(turn_id as u64)),
        session_id,
        timestamp: Timestamp(timestamp),
        role,
        text,
        embedding: embedding.as_deref().map(decode_embedding),
        action,
    })
}

fn load_last_ids(db: &Database) -> Result<HashMap<Uuid, u64>, VoxError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT session_id, MAX(turn_id) FROM turns GROUP BY session_id")
            .map_err(|e| VoxError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let session: String = row.get(0)?;
                let max_id: i64 = row.get(1)?;
                Ok((session, max_id))
            })
            .map_err(|e| VoxError::Storage(e.to_string()))?;

        let mut ids = HashMap::new();
        for row in rows {
            let (session, max_id) = row.map_err(|e| VoxError::Storage(e.to_string()))?;
            let session = Uuid::parse_str(&session)
                .map_err(|e| VoxError::Storage(format!("Corrupt session id: {}", e)))?;
            ids.insert(session, max_id as u64);
        }
        Ok(ids)
    })
}

fn load_index(db: &Database, index: &VectorIndex) -> Result<(), VoxError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT session_id, turn_id, embedding FROM turns WHERE embedding IS NOT NULL")
            .map_err(|e| VoxError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let session: String = row.get(0)?;
                let turn_id: i64 = row.get(1)?;
                let blob: Vec<u8> = row.get(2)?;
                Ok((session, turn_id, blob))
            })
            .map_err(|e| VoxError::Storage(e.to_string()))?;

        for row in rows {
            let (session, turn_id, blob) = row.map_err(|e| VoxError::Storage(e.to_string()))?;
            let session = Uuid::parse_str(&session)
                .map_err(|e| VoxError::Storage(format!("Corrupt session id: {}", e)))?;
            index.insert(session, TurnId(turn_id as u64), decode_embedding(&blob))?;
        }
        Ok(())
    })
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
