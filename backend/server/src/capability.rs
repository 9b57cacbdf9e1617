//! # Capability Gate
//!
//! Pure checks, no side effects.
//!
//! - Tiers: user < admin < superadmin
//! - No identity: [`LedgerError::Unauthorized`]
//! - Identity below the required tier: [`LedgerError::Forbidden`]
//! - Only the superadmin changes role or existence of another identity, and nobody touches the superadmin
use crate::{
    error::LedgerError,
    model::{Caller, Participant, Role},
};

pub fn authorize(caller: Option<&Caller>, required: Role) -> Result<&Caller, LedgerError> {
    let caller = caller.ok_or(LedgerError::Unauthorized)?;

    if caller.role < required {
        return Err(LedgerError::Forbidden);
    }

    Ok(caller)
}

pub fn authorize_identity_change(caller: &Caller, target: &Participant) -> Result<(), LedgerError> {
    authorize(Some(caller), Role::Superadmin)?;

    if target.role == Role::Superadmin {
        return Err(LedgerError::Forbidden);
    }

    Ok(())
}
