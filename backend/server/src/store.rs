//! # Store
//!
//! Shared durable tables behind every ledger operation.
//!
//! ## Concurrency
//!
//! Optimistic. Every logical row is addressed by a [`Key`] carrying a version
//! that only grows. A caller reads what it needs, remembers the versions it
//! saw, then hands the read set and its writes to [`Store::commit`]. The store
//! applies all writes as one step if no read key moved, otherwise nothing is
//! applied and [`StoreError::Conflict`] comes back.
//!
//! Each read is consistent on its own, several reads are not. The read set
//! validation at commit is what makes the whole operation serializable.
//!
//! Tally adjustments are deltas and commute, so nobody reads a tally to decide
//! a write. They are versioned under [`Key::Tally`], which keeps two
//! participants voting for the same item from invalidating each other.
//!
//! ## Backends
//!
//! - [`crate::memory::MemoryStore`]: in-process tables
//! - [`crate::database::RedisStore`]: Redis hashes, commit through a Lua script
use std::{collections::BTreeSet, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ItemId, MenuItem, Participant, ParticipantId, VoteRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    Admission,
    /// Bumped whenever a participant row is created or removed.
    Roster,
    /// Item metadata only. Votes move [`Key::Tally`] instead.
    Item(ItemId),
    Tally(ItemId),
    Vote(ParticipantId),
    Favorites(ParticipantId),
    Participant(ParticipantId),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Admission => f.write_str("admission"),
            Key::Roster => f.write_str("roster"),
            Key::Item(id) => write!(f, "item:{id}"),
            Key::Tally(id) => write!(f, "tally:{id}"),
            Key::Vote(id) => write!(f, "vote:{id}"),
            Key::Favorites(id) => write!(f, "favorites:{id}"),
            Key::Participant(id) => write!(f, "participant:{id}"),
        }
    }
}

/// Value read together with the version of the key it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    pub key: Key,
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn read(&self) -> (Key, u64) {
        (self.key, self.version)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sequence {
    Items,
    Participants,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Write {
    PutVote(VoteRecord),
    DeleteVote(ParticipantId),
    AdjustTally { item: ItemId, delta: i64 },
    SetClosed(bool),
    /// Zero every tally, drop every vote record, reopen admission.
    ResetCycle,
    /// Upserts metadata. The stored tally is kept, new rows start at 0.
    PutItem(MenuItem),
    /// Drops the item along with the vote records and favorite edges on it.
    DeleteItem(ItemId),
    /// Drops every item, vote record and favorite edge, reopens admission.
    ClearMenu,
    AddFavorite { participant: ParticipantId, item: ItemId },
    RemoveFavorite { participant: ParticipantId, item: ItemId },
    PutParticipant(Participant),
    /// Drops the row and its favorite edges. Vote records are the caller's job.
    DeleteParticipant(ParticipantId),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transaction conflict")]
    Conflict,

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("script: {0}")]
    Script(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn admission(&self) -> Result<Versioned<bool>, StoreError>;

    async fn item(&self, id: ItemId) -> Result<Versioned<Option<MenuItem>>, StoreError>;

    /// Every item ordered by id, tallies from one snapshot.
    async fn items(&self) -> Result<Vec<MenuItem>, StoreError>;

    async fn vote(&self, participant: ParticipantId)
    -> Result<Versioned<Option<VoteRecord>>, StoreError>;

    async fn votes(&self) -> Result<Vec<VoteRecord>, StoreError>;

    async fn favorites(
        &self,
        participant: ParticipantId,
    ) -> Result<Versioned<BTreeSet<ItemId>>, StoreError>;

    async fn participant(
        &self,
        id: ParticipantId,
    ) -> Result<Versioned<Option<Participant>>, StoreError>;

    /// Every participant ordered by id, with the roster version.
    async fn participants(&self) -> Result<Versioned<Vec<Participant>>, StoreError>;

    async fn next_id(&self, sequence: Sequence) -> Result<u64, StoreError>;

    async fn commit(&self, reads: &[(Key, u64)], writes: &[Write]) -> Result<(), StoreError>;
}
