//! # Ledger Model
//!
//! Rows shared by every component.
//!
//! - Participants: who may vote, with a role tier
//! - Menu items: what may be voted for, each carrying its live **tally**
//! - Vote records: at most one per participant
//!
//! ## Invariants
//!
//! - `MenuItem.tally` equals the number of vote records pointing at the item
//! - A participant holds at most one vote record
//! - Exactly one participant holds [`Role::Superadmin`]
use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability tier. Declaration order is the tier order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    Superadmin,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::Superadmin),
            other => Err(format!("unknown role {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        };

        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub role: Role,
    pub credential_version: u32,
}

impl Participant {
    /// Still holding the credential it was provisioned with.
    pub fn has_default_credentials(&self) -> bool {
        self.credential_version == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: ItemId,
    pub name: String,
    pub image_url: Option<String>,
    pub options: Vec<String>,
    pub is_active: bool,
    pub tally: u32,
}

impl MenuItem {
    pub fn offers(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

/// "participant currently orders item with these selections and notes"
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub participant: ParticipantId,
    pub item: ItemId,
    pub selections: BTreeSet<String>,
    pub notes: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionState {
    pub closed: bool,
}

/// Authenticated caller as stamped by the identity provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub participant: ParticipantId,
    pub role: Role,
}

/// Admin report line, one per live vote record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderLine {
    pub participant: String,
    pub item: String,
    pub selections: BTreeSet<String>,
    pub notes: String,
}

/// Drops duplicate and blank options, keeping first occurrence order.
pub fn normalize_options<I, S>(options: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = BTreeSet::new();

    options
        .into_iter()
        .map(|o| o.as_ref().trim().to_string())
        .filter(|o| !o.is_empty() && seen.insert(o.clone()))
        .collect()
}
