//! In-memory storage backend.
//!
//! Thread-safe implementation of [`ContactStore`] for embedded usage, tests,
//! and as a reference for the persistent backend.

use std::sync::RwLock;

use chrono::Utc;

use crate::contact::{Contact, ContactId, NewContact};
use crate::storage::index::ContactIndex;
use crate::storage::traits::{ContactStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory contact store.
#[derive(Debug, Default)]
pub struct InMemoryContactStore {
    state: RwLock<ContactIndex>,
}

impl InMemoryContactStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a contact exactly as given, keeping its id and timestamps.
    ///
    /// Used to seed fixtures, including malformed data the resolver never
    /// produces itself.
    pub fn insert_raw(&self, contact: Contact) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("contact.insert_raw"))?;
        state.insert(contact)
    }
}

impl ContactStore for InMemoryContactStore {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        if email.is_none() && phone_number.is_none() {
            return Err(StorageError::InvalidQuery(
                "find_by_email_or_phone needs an email or a phone number".to_string(),
            ));
        }
        let state = self.state.read().map_err(|_| lock_err("contact.find"))?;
        Ok(state.find_by_email_or_phone(email, phone_number))
    }

    fn create(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("contact.create"))?;
        let contact = state.allocate(contact, Utc::now());
        state.insert(contact.clone())?;
        Ok(contact)
    }

    fn update_link_precedence(
        &self,
        id: ContactId,
        linked_id: ContactId,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("contact.demote"))?;
        state.demote(id, linked_id, Utc::now())
    }

    fn find_all_linked_contacts(
        &self,
        primary_id: ContactId,
    ) -> Result<Vec<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.linked"))?;
        Ok(state.find_linked(primary_id))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.get"))?;
        Ok(state.get(id).cloned())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.len"))?;
        Ok(state.len())
    }
}
