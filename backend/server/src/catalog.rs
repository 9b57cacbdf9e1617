//! # Catalog
//!
//! Menu administration. Admin tier for everything except wiping the whole menu, which is reserved for
//! the superadmin.
//!
//! Removing an item takes its vote records and favorite edges with it in the same commit, so the
//! tally invariant holds without any decrement.
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::{
    broadcast::{Broadcaster, ChangeEvent},
    capability::authorize,
    error::LedgerError,
    model::{Caller, ItemId, MenuItem, Role, normalize_options},
    store::{Sequence, Store, Write},
    utils::{RetryPolicy, with_retry},
};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ItemDraft {
    pub name: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl ItemDraft {
    fn validated_name(&self) -> Result<String, LedgerError> {
        let name = self.name.trim();

        if name.is_empty() {
            return Err(LedgerError::InvalidInput("name is empty".to_string()));
        }

        Ok(name.to_string())
    }
}

#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn Store>,
    broadcaster: Broadcaster,
    retry: RetryPolicy,
}

impl Catalog {
    pub fn new(store: Arc<dyn Store>, broadcaster: Broadcaster, retry: RetryPolicy) -> Self {
        Self {
            store,
            broadcaster,
            retry,
        }
    }

    pub async fn items(&self, include_archived: bool) -> Result<Vec<MenuItem>, LedgerError> {
        let mut items = self.store.items().await?;
        if !include_archived {
            items.retain(|item| item.is_active);
        }

        Ok(items)
    }

    pub async fn add_item(
        &self,
        caller: &Caller,
        draft: ItemDraft,
    ) -> Result<MenuItem, LedgerError> {
        authorize(Some(caller), Role::Admin)?;
        let name = draft.validated_name()?;

        let item = MenuItem {
            id: ItemId(self.store.next_id(Sequence::Items).await?),
            name,
            image_url: draft.image_url,
            options: normalize_options(&draft.options),
            is_active: true,
            tally: 0,
        };

        let write = &[Write::PutItem(item.clone())];
        with_retry(self.retry, "add_item", move || async move {
            self.store.commit(&[], write).await.map_err(LedgerError::from)
        })
        .await?;

        info!(item = %item.id, name = %item.name, "Item added");
        self.broadcaster.publish(ChangeEvent::MenuChanged);

        Ok(item)
    }

    /// Replaces name and options. The image is only replaced when the draft carries one.
    pub async fn edit_item(
        &self,
        caller: &Caller,
        id: ItemId,
        draft: ItemDraft,
    ) -> Result<MenuItem, LedgerError> {
        authorize(Some(caller), Role::Admin)?;
        let name = draft.validated_name()?;
        let options = normalize_options(&draft.options);
        let (name, options, image_url) = (&name, &options, &draft.image_url);

        let item = with_retry(self.retry, "edit_item", move || async move {
            self.update(id, |item| MenuItem {
                name: name.clone(),
                options: options.clone(),
                image_url: image_url.clone().or_else(|| item.image_url.clone()),
                ..item.clone()
            })
            .await
        })
        .await?;

        info!(item = %id, "Item edited");
        self.broadcaster.publish(ChangeEvent::MenuChanged);

        Ok(item)
    }

    /// Archive (`false`) or restore (`true`). Archived items keep their votes but take no new ones.
    pub async fn set_active(
        &self,
        caller: &Caller,
        id: ItemId,
        active: bool,
    ) -> Result<MenuItem, LedgerError> {
        authorize(Some(caller), Role::Admin)?;

        let item = with_retry(self.retry, "set_active", move || async move {
            self.update(id, |item| MenuItem {
                is_active: active,
                ..item.clone()
            })
            .await
        })
        .await?;

        info!(item = %id, active, "Item activity changed");
        self.broadcaster.publish(ChangeEvent::MenuChanged);

        Ok(item)
    }

    async fn update<F>(&self, id: ItemId, change: F) -> Result<MenuItem, LedgerError>
    where
        F: FnOnce(&MenuItem) -> MenuItem,
    {
        let current = self.store.item(id).await?;
        let Some(item) = &current.value else {
            return Err(LedgerError::ItemNotFound);
        };

        let updated = change(item);
        self.store
            .commit(&[current.read()], &[Write::PutItem(updated.clone())])
            .await?;

        Ok(updated)
    }

    pub async fn remove_item(&self, caller: &Caller, id: ItemId) -> Result<(), LedgerError> {
        authorize(Some(caller), Role::Admin)?;

        with_retry(self.retry, "remove_item", move || async move {
            let current = self.store.item(id).await?;
            if current.value.is_none() {
                return Err(LedgerError::ItemNotFound);
            }

            self.store
                .commit(&[current.read()], &[Write::DeleteItem(id)])
                .await
                .map_err(LedgerError::from)
        })
        .await?;

        info!(item = %id, "Item removed");
        self.broadcaster.publish(ChangeEvent::MenuChanged);

        Ok(())
    }

    /// Drops every item, vote record and favorite, then reopens admission.
    pub async fn clear_menu(&self, caller: &Caller) -> Result<(), LedgerError> {
        authorize(Some(caller), Role::Superadmin)?;

        with_retry(self.retry, "clear_menu", move || async move {
            self.store
                .commit(&[], &[Write::ClearMenu])
                .await
                .map_err(LedgerError::from)
        })
        .await?;

        info!(by = %caller.participant, "Menu cleared");
        self.broadcaster.publish(ChangeEvent::MenuChanged);
        self.broadcaster.publish(ChangeEvent::CycleReset);

        Ok(())
    }
}
