//! Resolution of which documents a caller may query.

use std::collections::HashSet;

use async_trait::async_trait;
use docqa_core::Result;

use crate::documents::DocumentRepo;

#[async_trait]
pub trait AccessResolver: Send + Sync {
    /// Ids of the documents `user_id` may retrieve from.
    async fn accessible_documents(&self, user_id: &str) -> Result<HashSet<String>>;
}

/// Every caller sees exactly the live documents they uploaded.
pub struct OwnerAccess {
    docs: DocumentRepo,
}

impl OwnerAccess {
    pub fn new(docs: DocumentRepo) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl AccessResolver for OwnerAccess {
    async fn accessible_documents(&self, user_id: &str) -> Result<HashSet<String>> {
        self.docs.ids_for_owner(user_id).await
    }
}
