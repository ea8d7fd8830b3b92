//! Identity resolution.
//!
//! [`IdentityResolver::identify`] matches a query against stored contacts and
//! decides whether to create a new primary, attach a secondary, or merge two
//! clusters. The result is the aggregated view of the cluster the query
//! belongs to.

use std::sync::{Arc, Mutex, PoisonError};

use crate::contact::{Contact, ContactId, NewContact};
use crate::error::{ResolveError, ResolveResult};
use crate::request::IdentifyQuery;
use crate::storage::ContactStore;
use crate::summary::{aggregate, IdentifyResponse};

/// Resolves identify queries against a [`ContactStore`].
pub struct IdentityResolver {
    store: Arc<dyn ContactStore>,
    /// Serializes whole identify calls; each one is a read-decide-write
    /// sequence over several store operations.
    write_gate: Mutex<()>,
}

impl IdentityResolver {
    /// Create a resolver over `store`.
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self {
            store,
            write_gate: Mutex::new(()),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    /// Resolve `query` to its cluster, creating or merging contacts as needed.
    ///
    /// Storage errors are returned unchanged. Nothing is rolled back: if a
    /// merge fails halfway, the demotions already written stay written.
    pub fn identify(&self, query: &IdentifyQuery) -> ResolveResult<IdentifyResponse> {
        let span = tracing::debug_span!(
            "identify",
            has_email = query.email().is_some(),
            has_phone = query.phone_number().is_some()
        );
        let _enter = span.enter();
        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);

        let email = query.email();
        let phone_number = query.phone_number();
        let matches = self.store.find_by_email_or_phone(email, phone_number)?;
        tracing::debug!(matches = matches.len(), "looked up contact points");

        if matches.is_empty() {
            let created = self.store.create(NewContact::primary(
                email.map(str::to_string),
                phone_number.map(str::to_string),
            ))?;
            tracing::info!(id = %created.id, "created primary contact");
            return self.summarize(created.id);
        }

        let primaries: Vec<&Contact> = matches.iter().filter(|c| c.is_primary()).collect();
        let primary_id = match primaries.as_slice() {
            [] => {
                let id = fallback_primary_id(&matches)?;
                tracing::debug!(primary = %id, "no primary matched; derived from secondaries");
                id
            }
            [only] => only.id,
            _ => self.merge(&primaries)?,
        };

        if needs_new_secondary(&matches, email, phone_number) {
            let created = self.store.create(NewContact::secondary(
                email.map(str::to_string),
                phone_number.map(str::to_string),
                primary_id,
            ))?;
            tracing::info!(id = %created.id, primary = %primary_id, "created secondary contact");
        } else {
            tracing::debug!(primary = %primary_id, "query adds no new contact points");
        }

        self.summarize(primary_id)
    }

    /// Demote every primary except the oldest, returning the survivor's id.
    ///
    /// Secondaries of the demoted primaries keep pointing at them.
    fn merge(&self, primaries: &[&Contact]) -> ResolveResult<ContactId> {
        let survivor = primaries
            .iter()
            .min_by_key(|c| c.creation_key())
            .map(|c| c.id)
            .ok_or_else(|| ResolveError::integrity("merge called without primaries"))?;

        for other in primaries.iter().filter(|c| c.id != survivor) {
            self.store.update_link_precedence(other.id, survivor)?;
            tracing::info!(survivor = %survivor, demoted = %other.id, "merged clusters");
        }
        Ok(survivor)
    }

    fn summarize(&self, primary_id: ContactId) -> ResolveResult<IdentifyResponse> {
        let cluster = self.store.find_all_linked_contacts(primary_id)?;
        Ok(IdentifyResponse {
            contact: aggregate(primary_id, &cluster)?,
        })
    }
}

/// Primary id for a match set that contains no primary.
///
/// The first unlinked match wins; otherwise the first match's link target.
fn fallback_primary_id(matches: &[Contact]) -> ResolveResult<ContactId> {
    if let Some(root) = matches.iter().find(|c| c.linked_id.is_none()) {
        return Ok(root.id);
    }
    matches
        .first()
        .and_then(|c| c.linked_id)
        .ok_or_else(|| ResolveError::integrity("no primary can be derived from an empty match set"))
}

/// Whether the query carries a contact point none of `matches` has.
///
/// An exact `(email, phone)` match means no.
fn needs_new_secondary(matches: &[Contact], email: Option<&str>, phone_number: Option<&str>) -> bool {
    if matches.iter().any(|c| c.has_pair(email, phone_number)) {
        return false;
    }
    let new_email =
        email.is_some_and(|e| !matches.iter().any(|c| c.email.as_deref() == Some(e)));
    let new_phone = phone_number
        .is_some_and(|p| !matches.iter().any(|c| c.phone_number.as_deref() == Some(p)));
    new_email || new_phone
}
