//! Durable stream storage backed by `sled`
//!
//! Layout:
//! - `entries:<stream>` trees: big-endian entry id -> JSON `StoredEntry`, so
//!   iteration yields entries in id order
//! - `streams` tree: stream name -> big-endian id of the last appended entry
//! - `groups` tree: `<stream>\0<group>` -> JSON `ConsumerGroup`
//!
//! The broker engine writes through this store while holding its own lock, so
//! the store itself does no coordination.

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::broker::backend::EntryId;
use crate::broker::group::ConsumerGroup;
use crate::utils::BrokerError;

const STREAMS_TREE: &str = "streams";
const GROUPS_TREE: &str = "groups";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub payload: String,
    /// Milliseconds since the UNIX epoch.
    pub appended_at: i64,
}

/// Everything persisted for one stream, as returned by [`StreamStore::load`].
#[derive(Debug, Default)]
pub struct LoadedStream {
    pub name: String,
    pub last_id: EntryId,
    pub entries: Vec<(EntryId, StoredEntry)>,
    pub groups: Vec<ConsumerGroup>,
}

#[derive(Clone)]
pub struct StreamStore {
    db: Db,
}

impl StreamStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, BrokerError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn entries_tree(&self, stream: &str) -> Result<Tree, BrokerError> {
        Ok(self.db.open_tree(format!("entries:{stream}"))?)
    }

    fn group_key(stream: &str, group: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(stream.len() + group.len() + 1);
        key.extend_from_slice(stream.as_bytes());
        key.push(0);
        key.extend_from_slice(group.as_bytes());
        key
    }

    /// Persist an appended entry together with the stream's new last id.
    pub fn append_entry(
        &self,
        stream: &str,
        id: EntryId,
        entry: &StoredEntry,
    ) -> Result<(), BrokerError> {
        let serialized = serde_json::to_vec(entry)?;
        self.entries_tree(stream)?
            .insert(id.to_be_bytes(), serialized)?;
        self.save_stream(stream, id)
    }

    /// Record `last_id` for `stream`; also how an empty stream is made durable.
    pub fn save_stream(&self, stream: &str, last_id: EntryId) -> Result<(), BrokerError> {
        self.db
            .open_tree(STREAMS_TREE)?
            .insert(stream.as_bytes(), last_id.to_be_bytes().to_vec())?;
        Ok(())
    }

    pub fn save_group(&self, stream: &str, group: &ConsumerGroup) -> Result<(), BrokerError> {
        let serialized = serde_json::to_vec(group)?;
        self.db
            .open_tree(GROUPS_TREE)?
            .insert(Self::group_key(stream, &group.name), serialized)?;
        Ok(())
    }

    pub fn remove_entries(&self, stream: &str, ids: &[EntryId]) -> Result<(), BrokerError> {
        let tree = self.entries_tree(stream)?;
        for id in ids {
            tree.remove(id.to_be_bytes())?;
        }
        Ok(())
    }

    /// Load every stream with its entries and groups.
    pub fn load(&self) -> Result<Vec<LoadedStream>, BrokerError> {
        let mut streams = Vec::new();

        for item in self.db.open_tree(STREAMS_TREE)?.iter() {
            let (name, last_id) = item?;
            let name = String::from_utf8_lossy(&name).into_owned();
            let last_id = decode_id(&last_id)?;

            let mut entries = Vec::new();
            for item in self.entries_tree(&name)?.iter() {
                let (id, value) = item?;
                entries.push((decode_id(&id)?, serde_json::from_slice(&value)?));
            }

            let mut groups = Vec::new();
            for item in self
                .db
                .open_tree(GROUPS_TREE)?
                .scan_prefix(Self::group_key(&name, ""))
            {
                let (_, value) = item?;
                groups.push(serde_json::from_slice(&value)?);
            }

            streams.push(LoadedStream {
                name,
                last_id,
                entries,
                groups,
            });
        }

        Ok(streams)
    }

    pub fn flush(&self) -> Result<(), BrokerError> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_id(bytes: &[u8]) -> Result<EntryId, BrokerError> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| BrokerError::Protocol(format!("corrupt entry id of {} bytes", bytes.len())))?;
    Ok(EntryId::from_be_bytes(bytes))
}

impl std::fmt::Debug for StreamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStore")
            .field("db", &"sled::Db")
            .finish()
    }
}
