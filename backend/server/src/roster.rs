//! # Roster
//!
//! Participant administration.
//!
//! - One superadmin, created at boot by [`Roster::ensure_root`] and tracked by role, never by name
//! - Only the superadmin provisions, removes or re-roles participants
//! - Nobody removes or demotes the superadmin, and nobody is promoted to it
//! - Removing a participant drops their vote record and decrements its tally in the same commit
use std::sync::Arc;

use tracing::info;

use crate::{
    broadcast::{Broadcaster, ChangeEvent},
    capability::{authorize, authorize_identity_change},
    error::LedgerError,
    model::{Caller, Participant, ParticipantId, Role},
    store::{Sequence, Store, Write},
    utils::{RetryPolicy, with_retry},
};

#[derive(Clone)]
pub struct Roster {
    store: Arc<dyn Store>,
    broadcaster: Broadcaster,
    retry: RetryPolicy,
}

fn validated_name(name: &str) -> Result<String, LedgerError> {
    let name = name.trim();

    if name.is_empty() {
        return Err(LedgerError::InvalidInput("display name is empty".to_string()));
    }

    Ok(name.to_string())
}

impl Roster {
    pub fn new(store: Arc<dyn Store>, broadcaster: Broadcaster, retry: RetryPolicy) -> Self {
        Self {
            store,
            broadcaster,
            retry,
        }
    }

    /// Returns the superadmin, creating it under `name` on first boot.
    pub async fn ensure_root(&self, name: &str) -> Result<Participant, LedgerError> {
        let name = validated_name(name)?;
        let name = name.as_str();

        with_retry(self.retry, "ensure_root", move || async move {
            let roster = self.store.participants().await?;

            if let Some(root) = roster.value.iter().find(|p| p.role == Role::Superadmin) {
                return Ok(root.clone());
            }
            if roster.value.iter().any(|p| p.display_name == name) {
                return Err(LedgerError::DuplicateParticipant);
            }

            let root = Participant {
                id: ParticipantId(self.store.next_id(Sequence::Participants).await?),
                display_name: name.to_string(),
                role: Role::Superadmin,
                credential_version: 0,
            };

            self.store
                .commit(&[roster.read()], &[Write::PutParticipant(root.clone())])
                .await?;

            info!(participant = %root.id, name = %root.display_name, "Root identity created");
            Ok(root)
        })
        .await
    }

    pub async fn participant(&self, id: ParticipantId) -> Result<Participant, LedgerError> {
        self.store
            .participant(id)
            .await?
            .value
            .ok_or(LedgerError::ParticipantNotFound)
    }

    /// Everyone but the superadmin, ordered by display name.
    pub async fn list(&self) -> Result<Vec<Participant>, LedgerError> {
        let mut participants = self.store.participants().await?.value;
        participants.retain(|p| p.role != Role::Superadmin);
        participants.sort_by(|a, b| a.display_name.cmp(&b.display_name));

        Ok(participants)
    }

    pub async fn provision(
        &self,
        caller: &Caller,
        name: &str,
        role: Role,
    ) -> Result<Participant, LedgerError> {
        authorize(Some(caller), Role::Superadmin)?;
        if role == Role::Superadmin {
            return Err(LedgerError::Forbidden);
        }
        let name = validated_name(name)?;
        let name = name.as_str();

        let participant = with_retry(self.retry, "provision", move || async move {
            let roster = self.store.participants().await?;
            if roster.value.iter().any(|p| p.display_name == name) {
                return Err(LedgerError::DuplicateParticipant);
            }

            let participant = Participant {
                id: ParticipantId(self.store.next_id(Sequence::Participants).await?),
                display_name: name.to_string(),
                role,
                credential_version: 0,
            };

            self.store
                .commit(
                    &[roster.read()],
                    &[Write::PutParticipant(participant.clone())],
                )
                .await?;

            Ok(participant)
        })
        .await?;

        info!(participant = %participant.id, role = %role, "Participant provisioned");
        self.broadcaster.publish(ChangeEvent::ParticipantsChanged);

        Ok(participant)
    }

    pub async fn remove(&self, caller: &Caller, id: ParticipantId) -> Result<(), LedgerError> {
        authorize(Some(caller), Role::Superadmin)?;

        let had_vote = with_retry(self.retry, "remove_participant", move || async move {
            let target = self.store.participant(id).await?;
            let Some(participant) = &target.value else {
                return Err(LedgerError::ParticipantNotFound);
            };
            authorize_identity_change(caller, participant)?;

            let vote = self.store.vote(id).await?;
            let mut writes = Vec::new();
            if let Some(record) = &vote.value {
                writes.push(Write::AdjustTally {
                    item: record.item,
                    delta: -1,
                });
                writes.push(Write::DeleteVote(id));
            }
            writes.push(Write::DeleteParticipant(id));

            self.store
                .commit(&[target.read(), vote.read()], &writes)
                .await?;

            Ok(vote.value.is_some())
        })
        .await?;

        info!(participant = %id, "Participant removed");
        self.broadcaster.publish(ChangeEvent::ParticipantsChanged);
        if had_vote {
            self.broadcaster.publish(ChangeEvent::TallyChanged);
        }

        Ok(())
    }

    pub async fn set_role(
        &self,
        caller: &Caller,
        id: ParticipantId,
        role: Role,
    ) -> Result<Participant, LedgerError> {
        authorize(Some(caller), Role::Superadmin)?;
        if role == Role::Superadmin {
            return Err(LedgerError::Forbidden);
        }

        let participant = with_retry(self.retry, "set_role", move || async move {
            let target = self.store.participant(id).await?;
            let Some(participant) = &target.value else {
                return Err(LedgerError::ParticipantNotFound);
            };
            authorize_identity_change(caller, participant)?;

            let updated = Participant {
                role,
                ..participant.clone()
            };
            self.store
                .commit(&[target.read()], &[Write::PutParticipant(updated.clone())])
                .await?;

            Ok(updated)
        })
        .await?;

        info!(participant = %id, role = %role, "Role changed");
        self.broadcaster.publish(ChangeEvent::ParticipantsChanged);

        Ok(participant)
    }

    /// Marks the caller's credential as replaced.
    pub async fn rotate_credentials(&self, caller: &Caller) -> Result<Participant, LedgerError> {
        let id = caller.participant;

        with_retry(self.retry, "rotate_credentials", move || async move {
            let target = self.store.participant(id).await?;
            let Some(participant) = &target.value else {
                return Err(LedgerError::ParticipantNotFound);
            };

            let updated = Participant {
                credential_version: participant.credential_version.saturating_add(1),
                ..participant.clone()
            };
            self.store
                .commit(&[target.read()], &[Write::PutParticipant(updated.clone())])
                .await?;

            Ok(updated)
        })
        .await
    }
}
