//! RocksDB-backed session store
//!
//! Rows are bincode-encoded, except action log lines (JSON, for
//! debuggability). Every mutation goes through [`StateStore::apply`], which
//! writes one `WriteBatch` under the write lock after re-validating every
//! insert-only claim.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use super::schema::{self, keys, ALL_CFS, ROOM_RANGES};
use super::types::*;
use crate::game::{Game, VoteKind};
use crate::roles::Consumable;

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("Claim already taken: {0}")]
    ClaimConflict(String),
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to StateStore
pub type SharedStateStore = Arc<StateStore>;

/// One staged row mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowWrite {
    /// Upsert
    Put {
        cf: &'static str,
        key: String,
        value: Vec<u8>,
    },
    /// Insert-only; fails the batch if the key exists
    Insert {
        cf: &'static str,
        key: String,
        value: Vec<u8>,
    },
    Delete { cf: &'static str, key: String },
    /// Remove every row of a room
    PurgeRoom(String),
}

pub(crate) fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Deserialization(e.to_string()))
}

/// RocksDB-backed persistent session store
pub struct StateStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl StateStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;
        debug!(path = %path.display(), "State store opened");

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStateStore {
        Arc::new(self)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Generic reads
    // =========================================================================

    pub(crate) fn get_raw(&self, cf_name: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
        Ok(db.get_cf(cf, key.as_bytes())?)
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        match self.get_raw(cf_name, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn exists(&self, cf_name: &str, key: &str) -> StoreResult<bool> {
        Ok(self.get_raw(cf_name, key)?.is_some())
    }

    /// All (key, raw value) pairs under a prefix, in key order
    fn scan_raw(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut rows = Vec::new();
        for result in db.prefix_iterator_cf(cf, prefix.as_bytes()) {
            let (key, value) = result?;
            let key_str = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            if !key_str.starts_with(prefix) {
                break;
            }
            rows.push((key_str, value.to_vec()));
        }
        Ok(rows)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Session row with its player rows attached
    pub fn load_game(&self, room: &str) -> StoreResult<Option<Game>> {
        let Some(mut game) = self.get::<Game>(schema::CF_SESSIONS, &keys::session(room))? else {
            return Ok(None);
        };
        game.players = self
            .player_rows(room)?
            .into_iter()
            .map(|row| row.player)
            .collect();
        Ok(Some(game))
    }

    /// Every persisted game, players attached, ordered by room id
    pub fn list_games(&self) -> StoreResult<Vec<Game>> {
        let mut games = Vec::new();
        for (key, bytes) in self.scan_raw(schema::CF_SESSIONS, keys::SESSION_PREFIX)? {
            let Some(room) = keys::parse_session_room(&key) else {
                continue;
            };
            let mut game: Game = decode(&bytes)?;
            game.players = self
                .player_rows(room)?
                .into_iter()
                .map(|row| row.player)
                .collect();
            games.push(game);
        }
        Ok(games)
    }

    /// Player rows in seat order
    pub fn player_rows(&self, room: &str) -> StoreResult<Vec<PlayerRow>> {
        self.scan_raw(schema::CF_PLAYERS, &keys::room_prefix("player", room))?
            .iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    // =========================================================================
    // Claims
    // =========================================================================

    pub fn night_action(
        &self,
        room: &str,
        cycle: u32,
        action: &str,
        actor: &str,
    ) -> StoreResult<Option<NightActionClaim>> {
        self.get(
            schema::CF_NIGHT_ACTIONS,
            &keys::night_action(room, cycle, action, actor),
        )
    }

    pub fn vote(
        &self,
        room: &str,
        kind: VoteKind,
        ballot: u32,
        voter: &str,
    ) -> StoreResult<Option<VoteClaim>> {
        self.get(
            schema::CF_VOTES,
            &keys::vote(room, kind.as_str(), ballot, voter),
        )
    }

    pub fn consumable(&self, room: &str, item: Consumable) -> StoreResult<Option<ConsumableClaim>> {
        self.get(
            schema::CF_CONSUMABLES,
            &keys::consumable(room, item.as_str()),
        )
    }

    /// Action log lines in append order
    pub fn action_log(&self, room: &str) -> StoreResult<Vec<ActionLogEntry>> {
        self.scan_raw(schema::CF_ACTION_LOG, &keys::room_prefix("log", room))?
            .iter()
            .map(|(_, bytes)| {
                serde_json::from_slice(bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))
            })
            .collect()
    }

    /// Number of rows a room holds across all column families
    pub fn row_count(&self, room: &str) -> StoreResult<usize> {
        let mut count = usize::from(self.exists(schema::CF_SESSIONS, &keys::session(room))?);
        for (cf, tag) in ROOM_RANGES {
            count += self.scan_raw(cf, &keys::room_prefix(tag, room))?.len();
        }
        Ok(count)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply staged writes atomically.
    ///
    /// Insert-only rows are re-checked under the write lock; if any already
    /// exists nothing is written.
    pub fn apply(&self, writes: Vec<RowWrite>) -> StoreResult<()> {
        let db = self.db.write().map_err(|_| StoreError::LockPoisoned)?;
        let handle = |name: &str| {
            db.cf_handle(name)
                .ok_or_else(|| StoreError::ColumnFamilyNotFound(name.to_string()))
        };

        for write in &writes {
            if let RowWrite::Insert { cf, key, .. } = write {
                if db.get_cf(handle(cf)?, key.as_bytes())?.is_some() {
                    return Err(StoreError::ClaimConflict(key.clone()));
                }
            }
        }

        let mut batch = WriteBatch::default();
        for write in &writes {
            match write {
                RowWrite::Put { cf, key, value } | RowWrite::Insert { cf, key, value } => {
                    batch.put_cf(handle(cf)?, key.as_bytes(), value);
                }
                RowWrite::Delete { cf, key } => {
                    batch.delete_cf(handle(cf)?, key.as_bytes());
                }
                RowWrite::PurgeRoom(room) => {
                    batch.delete_cf(handle(schema::CF_SESSIONS)?, keys::session(room).as_bytes());
                    for (cf, tag) in ROOM_RANGES {
                        let prefix = keys::room_prefix(tag, room);
                        let end = keys::prefix_end(&prefix);
                        batch.delete_range_cf(handle(cf)?, prefix.as_bytes(), end.as_slice());
                    }
                }
            }
        }

        let count = writes.len();
        db.write(batch).map_err(|e| {
            error!(error = %e, "Batch write failed");
            StoreError::RocksDb(e)
        })?;
        debug!(writes = count, "Batch committed");
        Ok(())
    }

    /// Delete every row of a room
    pub fn purge_session(&self, room: &str) -> StoreResult<()> {
        self.apply(vec![RowWrite::PurgeRoom(room.to_string())])
    }

    /// Flush memtables of every column family
    pub fn flush(&self) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        for name in ALL_CFS {
            if let Some(cf) = db.cf_handle(name) {
                db.flush_cf(cf)?;
            }
        }
        Ok(())
    }
}
