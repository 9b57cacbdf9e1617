//! # Vote Ledger
//!
//! Owns vote records and keeps item tallies in step with them.
//!
//! ## Cast
//!
//! - No record yet: create it, tally +1 on the target
//! - Record on the same item: overwrite selections and notes, tallies untouched
//! - Record on another item: old tally -1, new tally +1, record rewritten
//!
//! All of it is one commit. The read set covers admission, the participant row, the target item and
//! the participant's record, so a concurrent reset, archive, removal or second cast by the same
//! participant forces a retry instead of a lost update.
//!
//! ## Cancel
//!
//! Tally -1 and record delete, one commit.
//!
//! Every successful cast or cancel publishes exactly one [`ChangeEvent::TallyChanged`].
use std::{collections::BTreeSet, sync::Arc};

use tracing::info;

use crate::{
    broadcast::{Broadcaster, ChangeEvent},
    error::LedgerError,
    model::{ItemId, MenuItem, OrderLine, ParticipantId, VoteRecord},
    store::{Store, Write},
    utils::{RetryPolicy, with_retry},
};

pub const UNKNOWN_ITEM: &str = "Unknown Item";

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
    broadcaster: Broadcaster,
    retry: RetryPolicy,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>, broadcaster: Broadcaster, retry: RetryPolicy) -> Self {
        Self {
            store,
            broadcaster,
            retry,
        }
    }

    pub async fn cast_or_update(
        &self,
        participant: ParticipantId,
        item: ItemId,
        selections: BTreeSet<String>,
        notes: String,
    ) -> Result<VoteRecord, LedgerError> {
        let selections = &selections;
        let notes = notes.as_str();

        let record = with_retry(self.retry, "cast", move || {
            self.try_cast(participant, item, selections, notes)
        })
        .await?;

        info!(participant = %participant, item = %item, "Vote cast");
        self.broadcaster.publish(ChangeEvent::TallyChanged);

        Ok(record)
    }

    async fn try_cast(
        &self,
        participant: ParticipantId,
        item: ItemId,
        selections: &BTreeSet<String>,
        notes: &str,
    ) -> Result<VoteRecord, LedgerError> {
        let admission = self.store.admission().await?;
        if admission.value {
            return Err(LedgerError::VotingClosed);
        }

        let voter = self.store.participant(participant).await?;
        if voter.value.is_none() {
            return Err(LedgerError::Unauthorized);
        }

        let target = self.store.item(item).await?;
        let menu_item = match &target.value {
            Some(menu_item) if menu_item.is_active => menu_item,
            _ => return Err(LedgerError::ItemNotFound),
        };

        if let Some(unknown) = selections.iter().find(|s| !menu_item.offers(s)) {
            return Err(LedgerError::InvalidSelection(unknown.clone()));
        }

        let existing = self.store.vote(participant).await?;

        let record = VoteRecord {
            participant,
            item,
            selections: selections.clone(),
            notes: notes.to_string(),
        };

        let mut writes = match &existing.value {
            None => vec![Write::AdjustTally { item, delta: 1 }],
            Some(previous) if previous.item == item => vec![],
            Some(previous) => vec![
                Write::AdjustTally {
                    item: previous.item,
                    delta: -1,
                },
                Write::AdjustTally { item, delta: 1 },
            ],
        };
        writes.push(Write::PutVote(record.clone()));

        self.store
            .commit(
                &[
                    admission.read(),
                    voter.read(),
                    target.read(),
                    existing.read(),
                ],
                &writes,
            )
            .await?;

        Ok(record)
    }

    pub async fn cancel(&self, participant: ParticipantId) -> Result<(), LedgerError> {
        let previous =
            with_retry(self.retry, "cancel", move || self.try_cancel(participant)).await?;

        info!(participant = %participant, item = %previous, "Vote cancelled");
        self.broadcaster.publish(ChangeEvent::TallyChanged);

        Ok(())
    }

    async fn try_cancel(&self, participant: ParticipantId) -> Result<ItemId, LedgerError> {
        let admission = self.store.admission().await?;
        if admission.value {
            return Err(LedgerError::VotingClosed);
        }

        let existing = self.store.vote(participant).await?;
        let Some(record) = &existing.value else {
            return Err(LedgerError::NoActiveVote);
        };

        self.store
            .commit(
                &[admission.read(), existing.read()],
                &[
                    Write::AdjustTally {
                        item: record.item,
                        delta: -1,
                    },
                    Write::DeleteVote(participant),
                ],
            )
            .await?;

        Ok(record.item)
    }

    pub async fn current_vote(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<VoteRecord>, LedgerError> {
        Ok(self.store.vote(participant).await?.value)
    }

    /// Every item with its tally, ordered by id.
    pub async fn tally_snapshot(&self) -> Result<Vec<MenuItem>, LedgerError> {
        Ok(self.store.items().await?)
    }

    /// One line per live vote, ordered by participant name.
    pub async fn orders(&self) -> Result<Vec<OrderLine>, LedgerError> {
        let votes = self.store.votes().await?;
        let participants = self.store.participants().await?.value;
        let items = self.store.items().await?;

        let mut lines: Vec<OrderLine> = votes
            .into_iter()
            .filter_map(|vote| {
                let participant = participants.iter().find(|p| p.id == vote.participant)?;
                let item = items
                    .iter()
                    .find(|i| i.id == vote.item)
                    .map(|i| i.name.clone())
                    .unwrap_or_else(|| UNKNOWN_ITEM.to_string());

                Some(OrderLine {
                    participant: participant.display_name.clone(),
                    item,
                    selections: vote.selections,
                    notes: vote.notes,
                })
            })
            .collect();

        lines.sort_by(|a, b| a.participant.cmp(&b.participant));

        Ok(lines)
    }
}
