//! Contact records and link precedence.
//!
//! A [`Contact`] is one observed pair of contact points (email and/or phone
//! number). Contacts that belong to the same person form an identity cluster:
//! one primary contact plus every secondary whose `linked_id` names it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned contact identifier.
///
/// Identifiers are handed out in increasing order, so comparing two ids also
/// compares their insertion order.
///
/// # Examples
///
/// ```
/// use contactlink::ContactId;
///
/// let id = ContactId::new(7);
/// assert_eq!(id.get(), 7);
/// assert_eq!(id.to_string(), "7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(u64);

impl ContactId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ContactId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Role of a contact inside its identity cluster.
///
/// Stored as the lowercase strings `"primary"` and `"secondary"`. Decoding
/// any other string fails, which keeps corrupted or hand-edited data from
/// entering the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LinkPrecedence {
    /// Canonical representative of a cluster.
    Primary,
    /// Extra evidence attached to a primary.
    Secondary,
}

impl LinkPrecedence {
    /// Wire name of the precedence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for LinkPrecedence {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(format!(
                "invalid link precedence: {other:?} (expected \"primary\" or \"secondary\")"
            )),
        }
    }
}

impl From<LinkPrecedence> for String {
    fn from(value: LinkPrecedence) -> Self {
        value.as_str().to_string()
    }
}

/// A stored contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Store-assigned identifier.
    pub id: ContactId,
    /// Email address, if one was supplied.
    pub email: Option<String>,
    /// Phone number in normalized string form, if one was supplied.
    pub phone_number: Option<String>,
    /// The primary this contact is attached to. Set only for secondaries.
    pub linked_id: Option<ContactId>,
    /// Primary or secondary.
    pub link_precedence: LinkPrecedence,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Time of the last mutation.
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion marker. Never set by the resolver.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    /// Returns true if this contact heads its cluster.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Returns true if the contact carries a soft-deletion timestamp.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Sort key giving creation order: `(created_at, id)` ascending.
    #[must_use]
    pub fn creation_key(&self) -> (DateTime<Utc>, ContactId) {
        (self.created_at, self.id)
    }

    /// Returns true if both contact points equal the given pair exactly.
    ///
    /// A missing value only matches a missing value.
    #[must_use]
    pub fn has_pair(&self, email: Option<&str>, phone_number: Option<&str>) -> bool {
        self.email.as_deref() == email && self.phone_number.as_deref() == phone_number
    }
}

/// Field values for a contact that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContact {
    /// Email address.
    pub email: Option<String>,
    /// Normalized phone number.
    pub phone_number: Option<String>,
    /// Primary to attach to (secondaries only).
    pub linked_id: Option<ContactId>,
    /// Role in the cluster.
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// A contact that starts its own cluster.
    #[must_use]
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// A contact attached to the primary `linked_id`.
    #[must_use]
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        linked_id: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            linked_id: Some(linked_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }
}
