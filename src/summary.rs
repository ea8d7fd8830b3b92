//! Aggregated view of a resolved identity cluster.

use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId};
use crate::error::{ResolveError, ResolveResult};

/// Deduplicated, order-stable view of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    /// Id of the cluster's primary.
    pub primary_contact_id: ContactId,
    /// Distinct emails, the primary's first.
    pub emails: Vec<String>,
    /// Distinct phone numbers, the primary's first.
    pub phone_numbers: Vec<String>,
    /// Ids of every other contact in the cluster, in creation order.
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Body returned by an identify call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    /// The resolved cluster.
    pub contact: ContactSummary,
}

fn push_unique(values: &mut Vec<String>, value: Option<&String>) {
    if let Some(v) = value {
        if !values.contains(v) {
            values.push(v.clone());
        }
    }
}

/// Build the summary for `primary_id` from its cluster members.
///
/// `contacts` is expected in creation order, as returned by
/// [`ContactStore::find_all_linked_contacts`](crate::storage::ContactStore::find_all_linked_contacts).
///
/// # Errors
/// `Integrity` if `primary_id` is not among `contacts`.
pub fn aggregate(primary_id: ContactId, contacts: &[Contact]) -> ResolveResult<ContactSummary> {
    let primary = contacts
        .iter()
        .find(|c| c.id == primary_id)
        .ok_or_else(|| {
            ResolveError::integrity(format!("primary contact {primary_id} is missing from its cluster"))
        })?;

    let mut summary = ContactSummary {
        primary_contact_id: primary_id,
        emails: Vec::new(),
        phone_numbers: Vec::new(),
        secondary_contact_ids: Vec::new(),
    };
    push_unique(&mut summary.emails, primary.email.as_ref());
    push_unique(&mut summary.phone_numbers, primary.phone_number.as_ref());

    for contact in contacts.iter().filter(|c| c.id != primary_id) {
        summary.secondary_contact_ids.push(contact.id);
        push_unique(&mut summary.emails, contact.email.as_ref());
        push_unique(&mut summary.phone_numbers, contact.phone_number.as_ref());
    }

    Ok(summary)
}
