/// API token module
///
/// Issues, stores and revokes API access tokens. Handles access key
/// generation and hashing, the type/permission invariant, and permission set
/// reconciliation on update.

mod manager;
mod model;
mod permissions;
mod reconcile;
pub mod secret;

pub use manager::TokenManager;
pub use model::{
    ApiToken, ApiTokenView, CreateApiToken, CreatedApiToken, NewApiToken, OrderBy, Permission,
    TokenChanges, TokenCriteria, TokenType, UpdateApiToken,
};
pub use permissions::validate_permissions;
pub use reconcile::{diff, PermissionDiff};
