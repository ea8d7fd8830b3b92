//! In-memory contact index shared by every backend.
//!
//! The persistent backend keeps one of these as its read view and rebuilds
//! it from segment snapshots plus WAL replay.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::storage::traits::StorageError;

/// Indexed contact state.
#[derive(Debug, Clone)]
pub struct ContactIndex {
    by_id: BTreeMap<ContactId, Contact>,
    by_email: HashMap<String, BTreeSet<ContactId>>,
    by_phone: HashMap<String, BTreeSet<ContactId>>,
    by_linked: HashMap<ContactId, BTreeSet<ContactId>>,
    next_id: u64,
    last_created_at: Option<DateTime<Utc>>,
}

impl Default for ContactIndex {
    fn default() -> Self {
        Self {
            by_id: BTreeMap::new(),
            by_email: HashMap::new(),
            by_phone: HashMap::new(),
            by_linked: HashMap::new(),
            next_id: 1,
            last_created_at: None,
        }
    }
}

/// Serializable form of a [`ContactIndex`].
///
/// Secondary indexes are derived data and are rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactSnapshot {
    /// Every stored contact in id order.
    pub contacts: Vec<Contact>,
    /// Next id to hand out.
    pub next_id: u64,
}

impl ContactIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the contact a `create` call would store, without storing it.
    ///
    /// `created_at` never goes below the last issued timestamp, so creation
    /// order and id order agree even if the wall clock steps back.
    #[must_use]
    pub fn allocate(&self, new: NewContact, now: DateTime<Utc>) -> Contact {
        let created_at = match self.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };
        Contact {
            id: ContactId::new(self.next_id),
            email: new.email,
            phone_number: new.phone_number,
            linked_id: new.linked_id,
            link_precedence: new.link_precedence,
            created_at,
            updated_at: created_at,
            deleted_at: None,
        }
    }

    /// Insert a fully formed contact.
    pub fn insert(&mut self, contact: Contact) -> Result<(), StorageError> {
        if self.by_id.contains_key(&contact.id) {
            return Err(StorageError::BackendError(format!(
                "duplicate contact id: {}",
                contact.id
            )));
        }
        let after = contact.id.get().checked_add(1).ok_or_else(|| {
            StorageError::BackendError(format!("contact id {} leaves no id to allocate next", contact.id))
        })?;
        self.add_keys(&contact);
        self.next_id = self.next_id.max(after);
        self.last_created_at = Some(match self.last_created_at {
            Some(last) if last > contact.created_at => last,
            _ => contact.created_at,
        });
        self.by_id.insert(contact.id, contact);
        Ok(())
    }

    /// Mark `id` as a secondary of `linked_id`.
    pub fn demote(
        &mut self,
        id: ContactId,
        linked_id: ContactId,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let contact = self
            .by_id
            .get_mut(&id)
            .ok_or(StorageError::ContactNotFound(id))?;

        let previous = contact.linked_id.replace(linked_id);
        contact.link_precedence = LinkPrecedence::Secondary;
        contact.updated_at = updated_at;

        if let Some(prev) = previous {
            if let Some(ids) = self.by_linked.get_mut(&prev) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_linked.remove(&prev);
                }
            }
        }
        self.by_linked.entry(linked_id).or_default().insert(id);
        Ok(())
    }

    /// Contacts matching either key, in creation order.
    #[must_use]
    pub fn find_by_email_or_phone(&self, email: Option<&str>, phone: Option<&str>) -> Vec<Contact> {
        let mut ids = BTreeSet::new();
        if let Some(hits) = email.and_then(|e| self.by_email.get(e)) {
            ids.extend(hits.iter().copied());
        }
        if let Some(hits) = phone.and_then(|p| self.by_phone.get(p)) {
            ids.extend(hits.iter().copied());
        }
        self.collect_live(ids)
    }

    /// `primary_id` and its direct secondaries, in creation order.
    #[must_use]
    pub fn find_linked(&self, primary_id: ContactId) -> Vec<Contact> {
        let mut ids = BTreeSet::new();
        ids.insert(primary_id);
        if let Some(linked) = self.by_linked.get(&primary_id) {
            ids.extend(linked.iter().copied());
        }
        self.collect_live(ids)
    }

    /// Look up a single contact.
    #[must_use]
    pub fn get(&self, id: ContactId) -> Option<&Contact> {
        self.by_id.get(&id)
    }

    /// Number of stored contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if the index holds no contacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Copy the index into its serializable form.
    #[must_use]
    pub fn snapshot(&self) -> ContactSnapshot {
        ContactSnapshot {
            contacts: self.by_id.values().cloned().collect(),
            next_id: self.next_id,
        }
    }

    /// Rebuild an index from a snapshot.
    pub fn from_snapshot(snapshot: ContactSnapshot) -> Result<Self, StorageError> {
        let mut index = Self::new();
        for contact in snapshot.contacts {
            index.insert(contact)?;
        }
        index.next_id = index.next_id.max(snapshot.next_id);
        Ok(index)
    }

    fn add_keys(&mut self, contact: &Contact) {
        if let Some(email) = &contact.email {
            self.by_email
                .entry(email.clone())
                .or_default()
                .insert(contact.id);
        }
        if let Some(phone) = &contact.phone_number {
            self.by_phone
                .entry(phone.clone())
                .or_default()
                .insert(contact.id);
        }
        if let Some(linked) = contact.linked_id {
            self.by_linked.entry(linked).or_default().insert(contact.id);
        }
    }

    fn collect_live(&self, ids: BTreeSet<ContactId>) -> Vec<Contact> {
        let mut out: Vec<Contact> = ids
            .into_iter()
            .filter_map(|id| self.by_id.get(&id))
            .filter(|c| !c.is_deleted())
            .cloned()
            .collect();
        out.sort_by_key(Contact::creation_key);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn add(index: &mut ContactIndex, new: NewContact) -> Contact {
        let contact = index.allocate(new, Utc::now());
        index.insert(contact.clone()).unwrap();
        contact
    }

    #[test]
    fn allocate_hands_out_increasing_ids() {
        let mut index = ContactIndex::new();
        let a = add(&mut index, NewContact::primary(Some("a@x.io".into()), None));
        let b = add(&mut index, NewContact::primary(Some("b@x.io".into()), None));
        assert_eq!(a.id, ContactId::new(1));
        assert_eq!(b.id, ContactId::new(2));
    }

    #[test]
    fn allocate_clamps_clock_going_backwards() {
        let mut index = ContactIndex::new();
        let a = add(&mut index, NewContact::primary(Some("a@x.io".into()), None));
        let earlier = a.created_at - Duration::seconds(30);
        let b = index.allocate(NewContact::primary(Some("b@x.io".into()), None), earlier);
        assert_eq!(b.created_at, a.created_at);
        assert!(a.creation_key() < b.creation_key());
    }

    #[test]
    fn find_by_email_or_phone_unions_both_keys() {
        let mut index = ContactIndex::new();
        let a = add(&mut index, NewContact::primary(Some("a@x.io".into()), None));
        let b = add(&mut index, NewContact::primary(None, Some("555".into())));
        add(&mut index, NewContact::primary(Some("c@x.io".into()), Some("777".into())));

        let hits = index.find_by_email_or_phone(Some("a@x.io"), Some("555"));
        let ids: Vec<_> = hits.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);

        assert!(index.find_by_email_or_phone(None, None).is_empty());
    }

    #[test]
    fn deleted_contacts_are_skipped_by_lookups() {
        let mut index = ContactIndex::new();
        let mut gone = index.allocate(NewContact::primary(Some("a@x.io".into()), None), Utc::now());
        gone.deleted_at = Some(Utc::now());
        index.insert(gone.clone()).unwrap();

        assert!(index.find_by_email_or_phone(Some("a@x.io"), None).is_empty());
        assert!(index.find_linked(gone.id).is_empty());
        assert!(index.get(gone.id).is_some());
    }

    #[test]
    fn demote_moves_linked_index_entry() {
        let mut index = ContactIndex::new();
        let x = add(&mut index, NewContact::primary(Some("a@x.io".into()), None));
        let y = add(&mut index, NewContact::primary(None, Some("555".into())));
        let s = add(&mut index, NewContact::secondary(Some("b@x.io".into()), None, y.id));

        index.demote(s.id, x.id, Utc::now()).unwrap();
        assert_eq!(index.find_linked(y.id).len(), 1);
        let under_x: Vec<_> = index.find_linked(x.id).iter().map(|c| c.id).collect();
        assert_eq!(under_x, vec![x.id, s.id]);
    }

    #[test]
    fn demote_unknown_contact_fails() {
        let mut index = ContactIndex::new();
        let err = index
            .demote(ContactId::new(5), ContactId::new(1), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StorageError::ContactNotFound(id) if id == ContactId::new(5)));
    }

    #[test]
    fn snapshot_rebuilds_indexes_and_next_id() {
        let mut index = ContactIndex::new();
        let x = add(&mut index, NewContact::primary(Some("a@x.io".into()), None));
        add(&mut index, NewContact::secondary(None, Some("555".into()), x.id));

        let rebuilt = ContactIndex::from_snapshot(index.snapshot()).unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt.find_linked(x.id).len(), 2);
        assert_eq!(rebuilt.find_by_email_or_phone(None, Some("555")).len(), 1);

        let next = rebuilt.allocate(NewContact::primary(None, Some("1".into())), Utc::now());
        assert_eq!(next.id, ContactId::new(3));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut index = ContactIndex::new();
        let a = add(&mut index, NewContact::primary(Some("a@x.io".into()), None));
        assert!(index.insert(a).is_err());
    }

    #[test]
    fn insert_rejects_last_possible_id() {
        let mut index = ContactIndex::new();
        let mut contact = index.allocate(NewContact::primary(Some("max@x.io".into()), None), Utc::now());
        contact.id = ContactId::new(u64::MAX);

        let err = index.insert(contact).unwrap_err();
        assert!(matches!(err, StorageError::BackendError(_)));
        assert!(index.is_empty());
        assert!(index.find_by_email_or_phone(Some("max@x.io"), None).is_empty());
    }
}
