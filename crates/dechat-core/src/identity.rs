use async_trait::async_trait;

use dechat_types::models::WebId;

use crate::storage::StorageError;

// -- Profile predicates --

/// vCard formatted name.
pub const FN: &str = "fn";
/// vCard photo reference.
pub const HAS_PHOTO: &str = "hasPhoto";

/// Identity and profile access for the signed-in user.
///
/// Predicates are given by local name (`fn`, `hasPhoto`); the implementation
/// decides which vocabulary they resolve against.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// WebId of the signed-in user. Waits for authentication to settle;
    /// `None` means nobody is signed in.
    async fn session(&self) -> Option<WebId>;

    /// Read a field of the signed-in user's own profile.
    async fn profile_field(&self, predicate: &str) -> Result<Option<String>, StorageError>;

    async fn friends(&self) -> Result<Vec<WebId>, StorageError>;

    async fn add_friend(&self, peer: &WebId) -> Result<(), StorageError>;

    async fn remove_friend(&self, peer: &WebId) -> Result<(), StorageError>;

    /// Read a field of another user's profile.
    async fn friend_field(
        &self,
        peer: &WebId,
        predicate: &str,
    ) -> Result<Option<String>, StorageError>;
}
