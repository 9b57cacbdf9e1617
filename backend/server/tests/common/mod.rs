#![allow(dead_code)]

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use canteen_server::{
    catalog::ItemDraft,
    config::Config,
    memory::MemoryStore,
    model::{Caller, ItemId, MenuItem, Participant, ParticipantId, Role, VoteRecord},
    state::State,
    store::{Key, Sequence, Store, StoreError, Versioned, Write},
    utils::RetryPolicy,
};

/// Memory store that pauses before every commit, so concurrent operations really do interleave
/// between their reads and their commit. Counts the commits it rejected.
#[derive(Default)]
pub struct SlowCommits {
    inner: MemoryStore,
    delay: Duration,
    conflicts: AtomicUsize,
}

impl SlowCommits {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Store for SlowCommits {
    async fn admission(&self) -> Result<Versioned<bool>, StoreError> {
        self.inner.admission().await
    }

    async fn item(&self, id: ItemId) -> Result<Versioned<Option<MenuItem>>, StoreError> {
        self.inner.item(id).await
    }

    async fn items(&self) -> Result<Vec<MenuItem>, StoreError> {
        self.inner.items().await
    }

    async fn vote(
        &self,
        participant: ParticipantId,
    ) -> Result<Versioned<Option<VoteRecord>>, StoreError> {
        self.inner.vote(participant).await
    }

    async fn votes(&self) -> Result<Vec<VoteRecord>, StoreError> {
        self.inner.votes().await
    }

    async fn favorites(
        &self,
        participant: ParticipantId,
    ) -> Result<Versioned<BTreeSet<ItemId>>, StoreError> {
        self.inner.favorites(participant).await
    }

    async fn participant(
        &self,
        id: ParticipantId,
    ) -> Result<Versioned<Option<Participant>>, StoreError> {
        self.inner.participant(id).await
    }

    async fn participants(&self) -> Result<Versioned<Vec<Participant>>, StoreError> {
        self.inner.participants().await
    }

    async fn next_id(&self, sequence: Sequence) -> Result<u64, StoreError> {
        self.inner.next_id(sequence).await
    }

    async fn commit(&self, reads: &[(Key, u64)], writes: &[Write]) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;

        let result = self.inner.commit(reads, writes).await;
        if matches!(result, Err(StoreError::Conflict)) {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

pub struct Harness {
    pub state: State,
    pub root: Caller,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    /// Generous retry budget for tests that hammer the same rows from many tasks.
    pub async fn contended(store: Arc<dyn Store>) -> Self {
        Self::with_store(
            Config {
                retry: RetryPolicy {
                    max_attempts: 50,
                    base_backoff: Duration::from_micros(200),
                },
                ..Config::default()
            },
            store,
        )
        .await
    }

    pub async fn with_config(config: Config) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        let state = State::with_store(config, store);
        let root = state.roster.ensure_root("admin").await.unwrap();

        Self {
            state,
            root: Caller {
                participant: root.id,
                role: Role::Superadmin,
            },
        }
    }

    pub async fn participant(&self, name: &str, role: Role) -> Caller {
        let participant = self
            .state
            .roster
            .provision(&self.root, name, role)
            .await
            .unwrap();

        Caller {
            participant: participant.id,
            role,
        }
    }

    pub async fn voter(&self, name: &str) -> ParticipantId {
        self.participant(name, Role::User).await.participant
    }

    pub async fn item(&self, name: &str, options: &[&str]) -> ItemId {
        self.state
            .catalog
            .add_item(
                &self.root,
                ItemDraft {
                    name: name.to_string(),
                    options: options.iter().map(|o| o.to_string()).collect(),
                    image_url: None,
                },
            )
            .await
            .unwrap()
            .id
    }

    pub async fn tally(&self, item: ItemId) -> u32 {
        self.state
            .ledger
            .tally_snapshot()
            .await
            .unwrap()
            .into_iter()
            .find(|i| i.id == item)
            .map(|i| i.tally)
            .unwrap_or(0)
    }

    /// Checks that every tally equals the number of records pointing at its item.
    pub async fn assert_consistent(&self) {
        let items = self.state.ledger.tally_snapshot().await.unwrap();
        let orders = self.state.ledger.orders().await.unwrap();

        for item in &items {
            let records = orders.iter().filter(|o| o.item == item.name).count();
            assert_eq!(
                item.tally as usize, records,
                "tally of {} drifted from its records",
                item.name
            );
        }
    }
}

pub fn selections(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}
