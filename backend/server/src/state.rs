use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::{
    admission::AdmissionSwitch,
    broadcast::Broadcaster,
    catalog::Catalog,
    config::{Config, StoreKind},
    database::{RedisStore, run_event_relay},
    favorites::Favorites,
    ledger::Ledger,
    memory::MemoryStore,
    roster::Roster,
    store::Store,
};

pub struct State {
    pub config: Config,
    pub broadcaster: Broadcaster,
    pub ledger: Ledger,
    pub admission: AdmissionSwitch,
    pub favorites: Favorites,
    pub catalog: Catalog,
    pub roster: Roster,
}

impl State {
    pub async fn new() -> Result<Arc<Self>> {
        let config = Config::load()?;

        let store: Arc<dyn Store> = match config.store {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::Redis => Arc::new(RedisStore::connect(&config.redis_url).await?),
        };
        info!(store = ?config.store, "Store ready");

        let state = Self::with_store(config, store);

        if state.config.store == StoreKind::Redis {
            tokio::spawn(run_event_relay(
                state.config.redis_url.clone(),
                state.broadcaster.clone(),
            ));
        }

        let root = state.roster.ensure_root(&state.config.root_name).await?;
        info!(participant = %root.id, "Root identity is {}", root.display_name);

        Ok(Arc::new(state))
    }

    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        let broadcaster = Broadcaster::new(config.subscriber_buffer);
        let retry = config.retry;

        Self {
            ledger: Ledger::new(store.clone(), broadcaster.clone(), retry),
            admission: AdmissionSwitch::new(store.clone(), broadcaster.clone(), retry),
            favorites: Favorites::new(store.clone(), retry),
            catalog: Catalog::new(store.clone(), broadcaster.clone(), retry),
            roster: Roster::new(store, broadcaster.clone(), retry),
            broadcaster,
            config,
        }
    }
}
