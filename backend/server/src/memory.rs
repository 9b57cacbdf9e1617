//! In-process [`Store`] for single node deployments and tests.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    model::{ItemId, MenuItem, Participant, ParticipantId, VoteRecord},
    store::{Key, Sequence, Store, StoreError, Versioned, Write},
};

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_item: AtomicU64,
    next_participant: AtomicU64,
}

#[derive(Default)]
struct Tables {
    clock: u64,
    versions: HashMap<Key, u64>,
    closed: bool,
    items: BTreeMap<ItemId, MenuItem>,
    votes: BTreeMap<ParticipantId, VoteRecord>,
    favorites: BTreeMap<ParticipantId, BTreeSet<ItemId>>,
    participants: BTreeMap<ParticipantId, Participant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn version(&self, key: Key) -> u64 {
        self.versions.get(&key).copied().unwrap_or(0)
    }

    fn versioned<T>(&self, key: Key, value: T) -> Versioned<T> {
        Versioned {
            key,
            version: self.version(key),
            value,
        }
    }

    fn bump(&mut self, key: Key) {
        self.clock += 1;
        self.versions.insert(key, self.clock);
    }

    fn bump_all(&mut self, keys: Vec<Key>) {
        for key in keys {
            self.bump(key);
        }
    }

    fn apply(&mut self, write: &Write) {
        match write {
            Write::PutVote(record) => {
                self.votes.insert(record.participant, record.clone());
                self.bump(Key::Vote(record.participant));
            }
            Write::DeleteVote(participant) => {
                self.votes.remove(participant);
                self.bump(Key::Vote(*participant));
            }
            Write::AdjustTally { item, delta } => {
                if let Some(row) = self.items.get_mut(item) {
                    let next = i64::from(row.tally) + delta;
                    debug_assert!(next >= 0, "tally underflow on item {item}");
                    row.tally = u32::try_from(next.max(0)).unwrap_or(u32::MAX);
                }
                self.bump(Key::Tally(*item));
            }
            Write::SetClosed(closed) => {
                self.closed = *closed;
                self.bump(Key::Admission);
            }
            Write::ResetCycle => {
                let mut touched: Vec<Key> = self.votes.keys().map(|p| Key::Vote(*p)).collect();
                touched.extend(self.items.keys().map(|i| Key::Tally(*i)));
                touched.push(Key::Admission);

                self.votes.clear();
                for row in self.items.values_mut() {
                    row.tally = 0;
                }
                self.closed = false;

                self.bump_all(touched);
            }
            Write::PutItem(item) => {
                let tally = self.items.get(&item.id).map(|row| row.tally).unwrap_or(0);
                self.items.insert(
                    item.id,
                    MenuItem {
                        tally,
                        ..item.clone()
                    },
                );
                self.bump(Key::Item(item.id));
            }
            Write::DeleteItem(id) => {
                let mut touched = vec![Key::Item(*id), Key::Tally(*id)];
                self.items.remove(id);

                self.votes.retain(|participant, record| {
                    let keep = record.item != *id;
                    if !keep {
                        touched.push(Key::Vote(*participant));
                    }
                    keep
                });

                for (participant, set) in self.favorites.iter_mut() {
                    if set.remove(id) {
                        touched.push(Key::Favorites(*participant));
                    }
                }

                self.bump_all(touched);
            }
            Write::ClearMenu => {
                let mut touched: Vec<Key> = self.items.keys().map(|i| Key::Item(*i)).collect();
                touched.extend(self.items.keys().map(|i| Key::Tally(*i)));
                touched.extend(self.votes.keys().map(|p| Key::Vote(*p)));
                touched.extend(self.favorites.keys().map(|p| Key::Favorites(*p)));
                touched.push(Key::Admission);

                self.items.clear();
                self.votes.clear();
                self.favorites.clear();
                self.closed = false;

                self.bump_all(touched);
            }
            Write::AddFavorite { participant, item } => {
                self.favorites.entry(*participant).or_default().insert(*item);
                self.bump(Key::Favorites(*participant));
            }
            Write::RemoveFavorite { participant, item } => {
                if let Some(set) = self.favorites.get_mut(participant) {
                    set.remove(item);
                }
                self.bump(Key::Favorites(*participant));
            }
            Write::PutParticipant(participant) => {
                self.participants.insert(participant.id, participant.clone());
                self.bump_all(vec![Key::Participant(participant.id), Key::Roster]);
            }
            Write::DeleteParticipant(id) => {
                self.participants.remove(id);
                self.favorites.remove(id);
                self.bump_all(vec![Key::Participant(*id), Key::Favorites(*id), Key::Roster]);
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn admission(&self) -> Result<Versioned<bool>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.versioned(Key::Admission, tables.closed))
    }

    async fn item(&self, id: ItemId) -> Result<Versioned<Option<MenuItem>>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.versioned(Key::Item(id), tables.items.get(&id).cloned()))
    }

    async fn items(&self) -> Result<Vec<MenuItem>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.items.values().cloned().collect())
    }

    async fn vote(
        &self,
        participant: ParticipantId,
    ) -> Result<Versioned<Option<VoteRecord>>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.versioned(
            Key::Vote(participant),
            tables.votes.get(&participant).cloned(),
        ))
    }

    async fn votes(&self) -> Result<Vec<VoteRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.votes.values().cloned().collect())
    }

    async fn favorites(
        &self,
        participant: ParticipantId,
    ) -> Result<Versioned<BTreeSet<ItemId>>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.versioned(
            Key::Favorites(participant),
            tables
                .favorites
                .get(&participant)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn participant(
        &self,
        id: ParticipantId,
    ) -> Result<Versioned<Option<Participant>>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.versioned(Key::Participant(id), tables.participants.get(&id).cloned()))
    }

    async fn participants(&self) -> Result<Versioned<Vec<Participant>>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.versioned(
            Key::Roster,
            tables.participants.values().cloned().collect(),
        ))
    }

    async fn next_id(&self, sequence: Sequence) -> Result<u64, StoreError> {
        let counter = match sequence {
            Sequence::Items => &self.next_item,
            Sequence::Participants => &self.next_participant,
        };

        Ok(counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn commit(&self, reads: &[(Key, u64)], writes: &[Write]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        if reads
            .iter()
            .any(|(key, version)| tables.version(*key) != *version)
        {
            return Err(StoreError::Conflict);
        }

        for write in writes {
            tables.apply(write);
        }

        Ok(())
    }
}
