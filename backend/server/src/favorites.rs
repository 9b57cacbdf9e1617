//! # Favorites Index
//!
//! Per-participant bookmarks over menu items, independent of votes. Archived items stay toggleable,
//! removed ones do not. An edge only exists while both its participant and its item do.
use std::{collections::BTreeSet, sync::Arc};

use serde::Serialize;

use crate::{
    error::LedgerError,
    model::{ItemId, ParticipantId},
    store::{Store, Write},
    utils::{RetryPolicy, with_retry},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Toggled {
    pub added: bool,
}

#[derive(Clone)]
pub struct Favorites {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl Favorites {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn toggle(
        &self,
        participant: ParticipantId,
        item: ItemId,
    ) -> Result<Toggled, LedgerError> {
        with_retry(self.retry, "favorite", move || self.try_toggle(participant, item)).await
    }

    async fn try_toggle(
        &self,
        participant: ParticipantId,
        item: ItemId,
    ) -> Result<Toggled, LedgerError> {
        let owner = self.store.participant(participant).await?;
        if owner.value.is_none() {
            return Err(LedgerError::Unauthorized);
        }

        let target = self.store.item(item).await?;
        if target.value.is_none() {
            return Err(LedgerError::ItemNotFound);
        }

        let current = self.store.favorites(participant).await?;
        let added = !current.value.contains(&item);

        let write = if added {
            Write::AddFavorite { participant, item }
        } else {
            Write::RemoveFavorite { participant, item }
        };

        self.store
            .commit(&[owner.read(), target.read(), current.read()], &[write])
            .await?;

        Ok(Toggled { added })
    }

    pub async fn list(&self, participant: ParticipantId) -> Result<BTreeSet<ItemId>, LedgerError> {
        Ok(self.store.favorites(participant).await?.value)
    }
}
