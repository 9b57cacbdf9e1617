//! # Admission Switch
//!
//! Global open/closed gate on vote mutations, stored as one versioned row so the ledger reads it in
//! the same transaction as the vote it guards.
use std::sync::Arc;

use tracing::info;

use crate::{
    broadcast::{Broadcaster, ChangeEvent},
    capability::authorize,
    error::LedgerError,
    model::{AdmissionState, Caller, Role},
    store::{Store, Write},
    utils::{RetryPolicy, with_retry},
};

#[derive(Clone)]
pub struct AdmissionSwitch {
    store: Arc<dyn Store>,
    broadcaster: Broadcaster,
    retry: RetryPolicy,
}

impl AdmissionSwitch {
    pub fn new(store: Arc<dyn Store>, broadcaster: Broadcaster, retry: RetryPolicy) -> Self {
        Self {
            store,
            broadcaster,
            retry,
        }
    }

    pub async fn status(&self) -> Result<AdmissionState, LedgerError> {
        Ok(AdmissionState {
            closed: self.store.admission().await?.value,
        })
    }

    pub async fn set_closed(&self, caller: &Caller, closed: bool) -> Result<(), LedgerError> {
        authorize(Some(caller), Role::Admin)?;

        with_retry(self.retry, "set_closed", move || async move {
            self.store
                .commit(&[], &[Write::SetClosed(closed)])
                .await
                .map_err(LedgerError::from)
        })
        .await?;

        info!(closed, by = %caller.participant, "Admission switched");
        self.broadcaster
            .publish(ChangeEvent::AdmissionChanged { closed });

        Ok(())
    }

    /// Zeroes every tally, drops every vote record and reopens admission. Not reversible.
    pub async fn reset_cycle(&self, caller: &Caller) -> Result<(), LedgerError> {
        authorize(Some(caller), Role::Admin)?;

        with_retry(self.retry, "reset_cycle", move || async move {
            self.store
                .commit(&[], &[Write::ResetCycle])
                .await
                .map_err(LedgerError::from)
        })
        .await?;

        info!(by = %caller.participant, "Cycle reset");
        self.broadcaster.publish(ChangeEvent::CycleReset);

        Ok(())
    }
}
