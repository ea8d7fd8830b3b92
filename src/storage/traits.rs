//! Abstract storage contract for contacts.
//!
//! The resolver depends only on [`ContactStore`]. Each method is atomic on
//! its own; nothing here composes calls into a transaction.

use thiserror::Error;

use crate::contact::{Contact, ContactId, NewContact};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Contact not found.
    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    /// The call itself was malformed (e.g. a lookup with no keys).
    #[error("Invalid storage query: {0}")]
    InvalidQuery(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Storage trait for contact records.
///
/// All list-returning methods order their results by creation,
/// `(created_at, id)` ascending, and skip soft-deleted contacts.
pub trait ContactStore: Send + Sync {
    /// Every contact whose email equals `email` or whose phone equals `phone_number`.
    ///
    /// A `None` key matches nothing. Passing `None` for both is an
    /// [`StorageError::InvalidQuery`].
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError>;

    /// Insert a new contact, assigning its id and timestamps.
    fn create(&self, contact: NewContact) -> Result<Contact, StorageError>;

    /// Demote `id` to secondary under `linked_id`, refreshing `updated_at`.
    ///
    /// Only the named contact changes.
    fn update_link_precedence(&self, id: ContactId, linked_id: ContactId)
        -> Result<(), StorageError>;

    /// The contact `primary_id` plus every contact whose `linked_id` is `primary_id`.
    ///
    /// This is a single hop: contacts linked to one of those secondaries are
    /// not included.
    fn find_all_linked_contacts(&self, primary_id: ContactId)
        -> Result<Vec<Contact>, StorageError>;

    /// Get a contact by id, deleted or not.
    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Number of stored contacts, deleted ones included.
    fn len(&self) -> Result<usize, StorageError>;

    /// Returns true if nothing has been stored yet.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}
