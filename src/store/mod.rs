/// Persistence collaborators for tokens and their permissions
///
/// The token core talks only to these traits. Implementations must:
/// - keep token names unique
/// - keep `(token_id, action)` unique
/// - delete a token's permissions when the token is deleted

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::api_token::{ApiToken, NewApiToken, OrderBy, Permission, TokenChanges, TokenCriteria};
use crate::error::AppError;

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// First token matching `criteria`. Empty criteria match any token.
    async fn find_one(&self, criteria: &TokenCriteria) -> Result<Option<ApiToken>, AppError>;

    /// Every token matching `criteria`, sorted by `order` ascending
    async fn find_many(
        &self,
        criteria: &TokenCriteria,
        order: OrderBy,
    ) -> Result<Vec<ApiToken>, AppError>;

    /// Insert a token, assigning its id and creation time
    ///
    /// # Errors
    /// Unique-constraint violation if the name is taken
    async fn create(&self, token: NewApiToken) -> Result<ApiToken, AppError>;

    /// Apply `changes` to a token. `Ok(None)` if the id does not exist.
    async fn update(&self, id: Uuid, changes: &TokenChanges) -> Result<Option<ApiToken>, AppError>;

    /// Delete a token and, through the store, its permissions.
    /// Returns the deleted row, `Ok(None)` if the id does not exist.
    async fn delete(&self, id: Uuid) -> Result<Option<ApiToken>, AppError>;
}

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    /// Permissions owned by a token
    async fn find_for_token(&self, token_id: Uuid) -> Result<Vec<Permission>, AppError>;

    /// Bulk insert one permission per action, bound to `token_id`
    async fn create_many(
        &self,
        token_id: Uuid,
        actions: &[String],
    ) -> Result<Vec<Permission>, AppError>;

    /// Delete permissions by id; returns how many were removed
    async fn delete_many(&self, ids: &[Uuid]) -> Result<u64, AppError>;

    /// Delete every permission a token owns
    async fn delete_for_token(&self, token_id: Uuid) -> Result<u64, AppError>;
}
