/// API token lifecycle
///
/// `TokenManager` is the entry point for every token operation. It validates
/// input, generates and hashes access keys, and keeps each token's permission
/// rows consistent with its type. All durable state lives in the stores.

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::api_token::model::{
    ApiToken, ApiTokenView, CreateApiToken, CreatedApiToken, NewApiToken, OrderBy, TokenChanges,
    TokenCriteria, UpdateApiToken,
};
use crate::api_token::permissions::validate_permissions;
use crate::api_token::{reconcile, secret};
use crate::configuration::ConfigurationProvider;
use crate::error::{AppError, ErrorContext};
use crate::store::{PermissionRepository, TokenRepository};
use crate::validators::{is_valid_description, is_valid_token_name, normalize_actions};

#[derive(Clone)]
pub struct TokenManager {
    tokens: Arc<dyn TokenRepository>,
    permissions: Arc<dyn PermissionRepository>,
    config: Arc<dyn ConfigurationProvider>,
}

impl TokenManager {
    pub fn new(
        tokens: Arc<dyn TokenRepository>,
        permissions: Arc<dyn PermissionRepository>,
        config: Arc<dyn ConfigurationProvider>,
    ) -> Self {
        Self {
            tokens,
            permissions,
            config,
        }
    }

    /// Create a token and return its access key.
    ///
    /// The returned `access_key` is the only copy of the plaintext; only its
    /// hash is stored.
    ///
    /// # Errors
    /// - Validation: bad name/description/actions, or permissions that do not
    ///   fit the type
    /// - Config: no salt configured (checked before any write)
    /// - Database: the store rejected the write, e.g. a duplicate name
    pub async fn create(&self, attributes: CreateApiToken) -> Result<CreatedApiToken, AppError> {
        let context = ErrorContext::new("api_token_create");

        let name = is_valid_token_name(&attributes.name)?;
        let description = is_valid_description(attributes.description.as_deref())?;
        validate_permissions(attributes.token_type, attributes.permissions.as_deref())?;
        let actions = match &attributes.permissions {
            Some(requested) if attributes.token_type.is_custom() => normalize_actions(requested)?,
            _ => BTreeSet::new(),
        };

        let salt = secret::configured_salt(self.config.as_ref())?;
        let access_key = secret::generate_secret()?;
        let access_key_hash = secret::hash(&access_key, &salt)?;

        let token = self
            .tokens
            .create(NewApiToken {
                name,
                description,
                token_type: attributes.token_type,
                access_key_hash,
            })
            .await?;

        let permissions = if token.token_type.is_custom() {
            let actions: Vec<String> = actions.into_iter().collect();
            match self.permissions.create_many(token.id, &actions).await {
                Ok(created) => created,
                Err(e) => {
                    // A custom token must never outlive a failed permission write
                    let context = context.with_token_id(token.id);
                    context.log_error(&e);
                    if let Err(cleanup) = self.tokens.delete(token.id).await {
                        context.log_error(&cleanup);
                    }
                    return Err(e);
                }
            }
        } else {
            Vec::new()
        };

        tracing::info!(
            request_id = %context.request_id,
            token_id = %token.id,
            token_type = %token.token_type,
            permissions = permissions.len(),
            "API token created"
        );

        Ok(CreatedApiToken {
            token: ApiTokenView::project(&token, &permissions),
            access_key,
        })
    }

    /// Update a token's attributes and, for custom tokens, its permissions.
    ///
    /// Omitted fields keep their stored values; a blank `description` clears
    /// it. A custom token updated without `permissions` keeps its current set.
    /// Turning a custom token into a non-custom one drops its permissions.
    ///
    /// Permission rows a token is about to need are written before its type,
    /// and rows it must lose are removed before its type changes. If a later
    /// write fails, earlier ones are undone so the stored token keeps a valid
    /// type/permission pairing.
    ///
    /// # Errors
    /// - NotFound: no token with this id
    /// - Validation: see [`TokenManager::create`]
    /// - Database: the store rejected a write
    pub async fn update(
        &self,
        id: Uuid,
        attributes: UpdateApiToken,
    ) -> Result<ApiTokenView, AppError> {
        let context = ErrorContext::new("api_token_update").with_token_id(id);

        let existing = self.load(id).await?;
        let effective_type = attributes.token_type.unwrap_or(existing.token_type);

        let name = attributes
            .name
            .as_deref()
            .map(is_valid_token_name)
            .transpose()?;
        let description = attributes
            .description
            .as_deref()
            .map(|raw| is_valid_description(Some(raw)))
            .transpose()?;

        let keeps_current_set = effective_type.is_custom()
            && existing.token_type.is_custom()
            && attributes.permissions.is_none();
        if !keeps_current_set {
            validate_permissions(effective_type, attributes.permissions.as_deref())?;
        }
        let desired = match &attributes.permissions {
            Some(requested) if effective_type.is_custom() => Some(normalize_actions(requested)?),
            _ => None,
        };

        let changes = TokenChanges {
            name,
            description,
            token_type: attributes.token_type,
        };

        let token = if let Some(desired) = desired {
            let current = self.permissions.find_for_token(id).await?;
            let diff = reconcile::diff(&current, &desired);

            let added: Vec<Uuid> = if diff.to_create.is_empty() {
                Vec::new()
            } else {
                let actions: Vec<String> = diff.to_create.iter().cloned().collect();
                self.permissions
                    .create_many(id, &actions)
                    .await?
                    .into_iter()
                    .map(|p| p.id)
                    .collect()
            };

            let token = match self.tokens.update(id, &changes).await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    self.drop_added(&context, &added).await;
                    return Err(not_found(id));
                }
                Err(e) => {
                    context.log_error(&e);
                    self.drop_added(&context, &added).await;
                    return Err(e);
                }
            };

            if !diff.to_delete.is_empty() {
                let ids: Vec<Uuid> = diff.to_delete.iter().map(|p| p.id).collect();
                if let Err(e) = self.permissions.delete_many(&ids).await {
                    context.log_error(&e);
                    self.drop_added(&context, &added).await;
                    self.restore_attributes(&context, &existing).await;
                    return Err(e);
                }
            }

            tracing::debug!(
                request_id = %context.request_id,
                token_id = %id,
                created = diff.to_create.len(),
                deleted = diff.to_delete.len(),
                "Permissions reconciled"
            );
            token
        } else if existing.token_type.is_custom() && !effective_type.is_custom() {
            let dropped = self.permissions.find_for_token(id).await?;
            self.permissions.delete_for_token(id).await?;

            let updated = self
                .tokens
                .update(id, &changes)
                .await
                .and_then(|token| token.ok_or_else(|| not_found(id)));
            match updated {
                Ok(token) => token,
                Err(e) => {
                    context.log_error(&e);
                    let actions: Vec<String> = dropped.into_iter().map(|p| p.action).collect();
                    if let Err(restore) = self.permissions.create_many(id, &actions).await {
                        context.log_error(&restore);
                    }
                    return Err(e);
                }
            }
        } else {
            self.tokens
                .update(id, &changes)
                .await?
                .ok_or_else(|| not_found(id))?
        };

        tracing::info!(
            request_id = %context.request_id,
            token_id = %id,
            token_type = %token.token_type,
            "API token updated"
        );

        self.view(&token).await
    }

    /// Delete a token and its permissions, returning what was deleted.
    ///
    /// # Errors
    /// NotFound if the id does not exist.
    pub async fn revoke(&self, id: Uuid) -> Result<ApiTokenView, AppError> {
        let context = ErrorContext::new("api_token_revoke").with_token_id(id);

        let existing = self.load(id).await?;
        let permissions = self.permissions.find_for_token(id).await?;

        let deleted = self
            .tokens
            .delete(existing.id)
            .await?
            .ok_or_else(|| not_found(id))?;

        tracing::info!(
            request_id = %context.request_id,
            token_id = %id,
            "API token revoked"
        );

        Ok(ApiTokenView::project(&deleted, &permissions))
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<ApiTokenView>, AppError> {
        self.get_by(&TokenCriteria::by_id(id)).await
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<ApiTokenView>, AppError> {
        self.get_by(&TokenCriteria::by_name(name)).await
    }

    /// First token matching `criteria`. Empty criteria never match.
    pub async fn get_by(&self, criteria: &TokenCriteria) -> Result<Option<ApiTokenView>, AppError> {
        if criteria.is_empty() {
            return Ok(None);
        }

        match self.tokens.find_one(criteria).await? {
            Some(token) => Ok(Some(self.view(&token).await?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, criteria: &TokenCriteria) -> Result<bool, AppError> {
        Ok(self.get_by(criteria).await?.is_some())
    }

    /// Every token, sorted by name
    pub async fn list(&self) -> Result<Vec<ApiTokenView>, AppError> {
        let tokens = self
            .tokens
            .find_many(&TokenCriteria::default(), OrderBy::Name)
            .await?;

        let mut views = Vec::with_capacity(tokens.len());
        for token in &tokens {
            views.push(self.view(token).await?);
        }
        Ok(views)
    }

    /// Hash an access key with the configured salt
    pub fn hash(&self, access_key: &str) -> Result<String, AppError> {
        let salt = secret::configured_salt(self.config.as_ref())?;
        secret::hash(access_key, &salt)
    }

    /// Startup check; see [`secret::ensure_salt_configured`]
    pub fn ensure_salt_configured(&self) -> Result<(), AppError> {
        secret::ensure_salt_configured_from_env(self.config.as_ref())
    }

    /// Resolve a presented access key to its token
    pub async fn authenticate(&self, access_key: &str) -> Result<Option<ApiTokenView>, AppError> {
        if access_key.is_empty() {
            return Ok(None);
        }

        let access_key_hash = self.hash(access_key)?;
        self.get_by(&TokenCriteria::by_access_key_hash(access_key_hash))
            .await
    }

    // Compensation for a failed update; failures here are logged only
    async fn drop_added(&self, context: &ErrorContext, added: &[Uuid]) {
        if added.is_empty() {
            return;
        }
        if let Err(e) = self.permissions.delete_many(added).await {
            context.log_error(&e);
        }
    }

    async fn restore_attributes(&self, context: &ErrorContext, existing: &ApiToken) {
        let original = TokenChanges {
            name: Some(existing.name.clone()),
            description: Some(existing.description.clone()),
            token_type: Some(existing.token_type),
        };
        if let Err(e) = self.tokens.update(existing.id, &original).await {
            context.log_error(&e);
        }
    }

    async fn load(&self, id: Uuid) -> Result<ApiToken, AppError> {
        self.tokens
            .find_one(&TokenCriteria::by_id(id))
            .await?
            .ok_or_else(|| not_found(id))
    }

    async fn view(&self, token: &ApiToken) -> Result<ApiTokenView, AppError> {
        let permissions = if token.token_type.is_custom() {
            self.permissions.find_for_token(token.id).await?
        } else {
            Vec::new()
        };
        Ok(ApiTokenView::project(token, &permissions))
    }
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("api token {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_token::{Permission, TokenType};
    use crate::configuration::{RuntimeConfiguration, API_TOKEN_SALT_KEY};
    use crate::error::{DatabaseError, ValidationError};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager_with(store: &InMemoryStore, config: RuntimeConfiguration) -> TokenManager {
        TokenManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(config),
        )
    }

    fn setup() -> (TokenManager, InMemoryStore) {
        let store = InMemoryStore::new();
        let config = RuntimeConfiguration::new().with_value(API_TOKEN_SALT_KEY, "test-salt");
        (manager_with(&store, config), store)
    }

    fn actions(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn create_request(
        name: &str,
        token_type: TokenType,
        permissions: Option<&[&str]>,
    ) -> CreateApiToken {
        CreateApiToken {
            name: name.to_string(),
            description: None,
            token_type,
            permissions: permissions.map(actions),
        }
    }

    fn assert_validation(result: Result<impl std::fmt::Debug, AppError>, expected: ValidationError) {
        match result {
            Err(AppError::Validation(e)) => assert_eq!(e, expected),
            other => panic!("Expected {:?}, got {:?}", expected, other),
        }
    }

    #[tokio::test]
    async fn test_create_read_only_token() {
        let (manager, _) = setup();

        let created = manager
            .create(create_request("n", TokenType::ReadOnly, None))
            .await
            .expect("Failed to create token");

        assert_eq!(created.token.token_type, TokenType::ReadOnly);
        assert_eq!(created.token.permissions, None);
        assert_eq!(created.access_key.len(), 256);
    }

    #[tokio::test]
    async fn test_custom_token_without_permissions_is_rejected() {
        let (manager, _) = setup();

        assert_validation(
            manager.create(create_request("n", TokenType::Custom, None)).await,
            ValidationError::MissingPermissions,
        );
        assert_validation(
            manager
                .create(create_request("n", TokenType::Custom, Some(&[])))
                .await,
            ValidationError::MissingPermissions,
        );
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_custom_token_with_permissions_is_rejected() {
        let (manager, _) = setup();

        assert_validation(
            manager
                .create(create_request("n", TokenType::FullAccess, Some(&["a"])))
                .await,
            ValidationError::InvalidPermissions,
        );
        assert!(!manager.exists(&TokenCriteria::by_name("n")).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_custom_token_binds_permissions() {
        let (manager, store) = setup();

        let created = manager
            .create(create_request("n", TokenType::Custom, Some(&["a", "b"])))
            .await
            .unwrap();

        let rows = store.find_for_token(created.token.id).await.unwrap();
        let mut stored: Vec<String> = rows.iter().map(|p| p.action.clone()).collect();
        stored.sort();
        assert_eq!(stored, actions(&["a", "b"]));
        assert!(rows.iter().all(|p| p.token_id == created.token.id));
        assert_eq!(created.token.permissions, Some(actions(&["a", "b"])));
    }

    #[tokio::test]
    async fn test_duplicate_actions_collapse() {
        let (manager, store) = setup();

        let created = manager
            .create(create_request("n", TokenType::Custom, Some(&["a", " a", "a "])))
            .await
            .unwrap();
        assert_eq!(store.find_for_token(created.token.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_reconciles_permissions() {
        let (manager, store) = setup();
        let created = manager
            .create(create_request("t", TokenType::Custom, Some(&["a", "b"])))
            .await
            .unwrap();
        let id = created.token.id;
        let before = store.find_for_token(id).await.unwrap();
        let b_id = before.iter().find(|p| p.action == "b").map(|p| p.id);

        let updated = manager
            .update(
                id,
                UpdateApiToken {
                    permissions: Some(actions(&["b", "c"])),
                    ..UpdateApiToken::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.permissions, Some(actions(&["b", "c"])));
        let after = store.find_for_token(id).await.unwrap();
        // "b" survived untouched
        assert_eq!(after.iter().find(|p| p.action == "b").map(|p| p.id), b_id);
        assert!(after.iter().all(|p| p.action != "a"));
    }

    #[tokio::test]
    async fn test_update_with_same_permissions_writes_nothing() {
        let (manager, store) = setup();
        let created = manager
            .create(create_request("t", TokenType::Custom, Some(&["a", "b"])))
            .await
            .unwrap();
        let mut before = store.find_for_token(created.token.id).await.unwrap();

        manager
            .update(
                created.token.id,
                UpdateApiToken {
                    permissions: Some(actions(&["b", "a"])),
                    ..UpdateApiToken::default()
                },
            )
            .await
            .unwrap();

        let mut after = store.find_for_token(created.token.id).await.unwrap();
        before.sort_by(|x, y| x.action.cmp(&y.action));
        after.sort_by(|x, y| x.action.cmp(&y.action));
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_update_validates_against_effective_type() {
        let (manager, _) = setup();
        let read_only = manager
            .create(create_request("ro", TokenType::ReadOnly, None))
            .await
            .unwrap();
        let custom = manager
            .create(create_request("c", TokenType::Custom, Some(&["a"])))
            .await
            .unwrap();

        // Existing non-custom type, permissions supplied
        assert_validation(
            manager
                .update(
                    read_only.token.id,
                    UpdateApiToken {
                        permissions: Some(actions(&["a"])),
                        ..UpdateApiToken::default()
                    },
                )
                .await,
            ValidationError::InvalidPermissions,
        );

        // Switching to custom without permissions
        assert_validation(
            manager
                .update(
                    read_only.token.id,
                    UpdateApiToken {
                        token_type: Some(TokenType::Custom),
                        ..UpdateApiToken::default()
                    },
                )
                .await,
            ValidationError::MissingPermissions,
        );

        // Emptying a custom token
        assert_validation(
            manager
                .update(
                    custom.token.id,
                    UpdateApiToken {
                        permissions: Some(Vec::new()),
                        ..UpdateApiToken::default()
                    },
                )
                .await,
            ValidationError::MissingPermissions,
        );

        // Nothing was written by the rejected updates
        let unchanged = manager.get_by_id(read_only.token.id).await.unwrap().unwrap();
        assert_eq!(unchanged.token_type, TokenType::ReadOnly);
    }

    #[tokio::test]
    async fn test_partial_update_keeps_custom_permissions() {
        let (manager, _) = setup();
        let created = manager
            .create(create_request("t", TokenType::Custom, Some(&["a"])))
            .await
            .unwrap();

        let updated = manager
            .update(
                created.token.id,
                UpdateApiToken {
                    name: Some("renamed".to_string()),
                    description: Some("ci pipeline".to_string()),
                    ..UpdateApiToken::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.description.as_deref(), Some("ci pipeline"));
        assert_eq!(updated.permissions, Some(actions(&["a"])));
    }

    #[tokio::test]
    async fn test_switching_type_both_ways() {
        let (manager, store) = setup();
        let created = manager
            .create(create_request("t", TokenType::ReadOnly, None))
            .await
            .unwrap();
        let id = created.token.id;

        let custom = manager
            .update(
                id,
                UpdateApiToken {
                    token_type: Some(TokenType::Custom),
                    permissions: Some(actions(&["x", "y"])),
                    ..UpdateApiToken::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(custom.permissions, Some(actions(&["x", "y"])));

        let full = manager
            .update(
                id,
                UpdateApiToken {
                    token_type: Some(TokenType::FullAccess),
                    ..UpdateApiToken::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(full.token_type, TokenType::FullAccess);
        assert_eq!(full.permissions, None);
        assert!(store.find_for_token(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_token() {
        let (manager, _) = setup();

        match manager
            .update(Uuid::new_v4(), UpdateApiToken::default())
            .await
        {
            Err(AppError::NotFound(_)) => (),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_revoke_cascades_permissions() {
        let (manager, store) = setup();
        let created = manager
            .create(create_request("t", TokenType::Custom, Some(&["a", "b"])))
            .await
            .unwrap();

        let revoked = manager.revoke(created.token.id).await.unwrap();
        assert_eq!(revoked.id, created.token.id);
        assert_eq!(revoked.permissions, Some(actions(&["a", "b"])));
        assert_eq!(store.permission_count().unwrap(), 0);
        assert_eq!(manager.get_by_id(created.token.id).await.unwrap(), None);

        match manager.revoke(created.token.id).await {
            Err(AppError::NotFound(_)) => (),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_criteria_never_match() {
        let (manager, _) = setup();
        manager
            .create(create_request("t", TokenType::FullAccess, None))
            .await
            .unwrap();

        assert_eq!(manager.get_by(&TokenCriteria::default()).await.unwrap(), None);
        assert!(!manager.exists(&TokenCriteria::default()).await.unwrap());
        assert!(manager.exists(&TokenCriteria::by_name("t")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_hides_secrets() {
        let (manager, _) = setup();
        let mut keys = Vec::new();
        for name in ["zulu", "alpha", "mike"] {
            let created = manager
                .create(create_request(name, TokenType::ReadOnly, None))
                .await
                .unwrap();
            keys.push(created.access_key);
        }

        let listed = manager.list().await.unwrap();
        let names: Vec<&str> = listed.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mike", "zulu"]);

        let json = serde_json::to_string(&listed).unwrap();
        for key in &keys {
            assert!(!json.contains(key.as_str()));
            assert!(!json.contains(&manager.hash(key).unwrap()));
        }
    }

    #[tokio::test]
    async fn test_authenticate_with_access_key() {
        let (manager, _) = setup();
        let created = manager
            .create(create_request("t", TokenType::ReadOnly, None))
            .await
            .unwrap();

        let found = manager.authenticate(&created.access_key).await.unwrap();
        assert_eq!(found.map(|t| t.id), Some(created.token.id));
        assert_eq!(manager.authenticate("not-a-key").await.unwrap(), None);
        assert_eq!(manager.authenticate("").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_a_persistence_error() {
        let (manager, _) = setup();
        manager
            .create(create_request("t", TokenType::ReadOnly, None))
            .await
            .unwrap();

        match manager
            .create(create_request("t", TokenType::FullAccess, None))
            .await
        {
            Err(AppError::Database(DatabaseError::UniqueConstraintViolation(_))) => (),
            other => panic!("Expected unique violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_salt_fails_before_any_write() {
        let store = InMemoryStore::new();
        let manager = manager_with(&store, RuntimeConfiguration::new());

        match manager
            .create(create_request("t", TokenType::ReadOnly, None))
            .await
        {
            Err(AppError::Config(_)) => (),
            other => panic!("Expected configuration error, got {:?}", other),
        }
        assert!(manager.list().await.unwrap().is_empty());
        assert!(manager.hash("key").is_err());
    }

    #[test]
    fn test_ensure_salt_configured_with_configured_salt() {
        let (manager, _) = setup();
        assert!(manager.ensure_salt_configured().is_ok());
        assert_eq!(
            manager.hash("key").unwrap(),
            secret::hash("key", "test-salt").unwrap()
        );
    }

    /// Delegates to an in-memory store but fails chosen writes
    struct FailingPermissions {
        inner: InMemoryStore,
        fail_creates: bool,
        // Number of upcoming deletes to fail
        failing_deletes: AtomicUsize,
    }

    impl FailingPermissions {
        fn new(inner: &InMemoryStore, fail_creates: bool, failing_deletes: usize) -> Self {
            Self {
                inner: inner.clone(),
                fail_creates,
                failing_deletes: AtomicUsize::new(failing_deletes),
            }
        }

        fn delete_fails(&self) -> bool {
            self.failing_deletes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    fn pool_timeout() -> AppError {
        AppError::Database(DatabaseError::ConnectionPool(
            "pool timed out".to_string(),
        ))
    }

    #[async_trait]
    impl PermissionRepository for FailingPermissions {
        async fn find_for_token(&self, token_id: Uuid) -> Result<Vec<Permission>, AppError> {
            self.inner.find_for_token(token_id).await
        }

        async fn create_many(
            &self,
            token_id: Uuid,
            actions: &[String],
        ) -> Result<Vec<Permission>, AppError> {
            if self.fail_creates {
                return Err(pool_timeout());
            }
            self.inner.create_many(token_id, actions).await
        }

        async fn delete_many(&self, ids: &[Uuid]) -> Result<u64, AppError> {
            if self.delete_fails() {
                return Err(pool_timeout());
            }
            self.inner.delete_many(ids).await
        }

        async fn delete_for_token(&self, token_id: Uuid) -> Result<u64, AppError> {
            if self.delete_fails() {
                return Err(pool_timeout());
            }
            self.inner.delete_for_token(token_id).await
        }
    }

    fn failing_manager(store: &InMemoryStore, permissions: FailingPermissions) -> TokenManager {
        TokenManager::new(
            Arc::new(store.clone()),
            Arc::new(permissions),
            Arc::new(RuntimeConfiguration::new().with_value(API_TOKEN_SALT_KEY, "salt")),
        )
    }

    async fn stored(store: &InMemoryStore, id: Uuid) -> (ApiToken, Vec<String>) {
        let token = store
            .find_one(&TokenCriteria::by_id(id))
            .await
            .unwrap()
            .expect("token still stored");
        let mut actions: Vec<String> = store
            .find_for_token(id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.action)
            .collect();
        actions.sort();
        (token, actions)
    }

    #[tokio::test]
    async fn test_failed_permission_write_removes_token() {
        let store = InMemoryStore::new();
        let manager = failing_manager(&store, FailingPermissions::new(&store, true, 0));

        let result = manager
            .create(create_request("t", TokenType::Custom, Some(&["a"])))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Database(DatabaseError::ConnectionPool(_)))
        ));
        assert_eq!(
            store.find_one(&TokenCriteria::by_name("t")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_failed_permission_write_keeps_token_read_only() {
        let (manager, store) = setup();
        let created = manager
            .create(create_request("t", TokenType::ReadOnly, None))
            .await
            .unwrap();
        let manager = failing_manager(&store, FailingPermissions::new(&store, true, 0));

        let result = manager
            .update(
                created.token.id,
                UpdateApiToken {
                    token_type: Some(TokenType::Custom),
                    permissions: Some(actions(&["a"])),
                    ..UpdateApiToken::default()
                },
            )
            .await;

        assert!(matches!(
            result,
            Err(AppError::Database(DatabaseError::ConnectionPool(_)))
        ));
        let (token, permissions) = stored(&store, created.token.id).await;
        assert_eq!(token.token_type, TokenType::ReadOnly);
        assert!(permissions.is_empty());
    }

    #[tokio::test]
    async fn test_failed_permission_removal_keeps_token_custom() {
        let (manager, store) = setup();
        let created = manager
            .create(create_request("t", TokenType::Custom, Some(&["a", "b"])))
            .await
            .unwrap();
        let manager = failing_manager(&store, FailingPermissions::new(&store, false, 1));

        let result = manager
            .update(
                created.token.id,
                UpdateApiToken {
                    token_type: Some(TokenType::FullAccess),
                    ..UpdateApiToken::default()
                },
            )
            .await;

        assert!(result.is_err());
        let (token, permissions) = stored(&store, created.token.id).await;
        assert_eq!(token.token_type, TokenType::Custom);
        assert_eq!(permissions, actions(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_failed_reconcile_create_leaves_set_untouched() {
        let (manager, store) = setup();
        let created = manager
            .create(create_request("t", TokenType::Custom, Some(&["a"])))
            .await
            .unwrap();
        let manager = failing_manager(&store, FailingPermissions::new(&store, true, 0));

        let result = manager
            .update(
                created.token.id,
                UpdateApiToken {
                    permissions: Some(actions(&["b"])),
                    ..UpdateApiToken::default()
                },
            )
            .await;

        assert!(result.is_err());
        let (token, permissions) = stored(&store, created.token.id).await;
        assert_eq!(token.token_type, TokenType::Custom);
        assert_eq!(permissions, actions(&["a"]));
    }

    #[tokio::test]
    async fn test_failed_reconcile_delete_restores_token() {
        let (manager, store) = setup();
        let created = manager
            .create(CreateApiToken {
                description: Some("original".to_string()),
                ..create_request("t", TokenType::Custom, Some(&["a", "b"]))
            })
            .await
            .unwrap();
        let manager = failing_manager(&store, FailingPermissions::new(&store, false, 1));

        let result = manager
            .update(
                created.token.id,
                UpdateApiToken {
                    name: Some("renamed".to_string()),
                    description: Some("".to_string()),
                    permissions: Some(actions(&["c"])),
                    ..UpdateApiToken::default()
                },
            )
            .await;

        assert!(result.is_err());
        let (token, permissions) = stored(&store, created.token.id).await;
        assert_eq!(token.name, "t");
        assert_eq!(token.description.as_deref(), Some("original"));
        assert_eq!(permissions, actions(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_rejected_rename_drops_permissions_written_for_switch() {
        let (manager, store) = setup();
        let created = manager
            .create(create_request("a", TokenType::ReadOnly, None))
            .await
            .unwrap();
        manager
            .create(create_request("b", TokenType::ReadOnly, None))
            .await
            .unwrap();

        let result = manager
            .update(
                created.token.id,
                UpdateApiToken {
                    name: Some("b".to_string()),
                    token_type: Some(TokenType::Custom),
                    permissions: Some(actions(&["x"])),
                    ..UpdateApiToken::default()
                },
            )
            .await;

        assert!(matches!(
            result,
            Err(AppError::Database(DatabaseError::UniqueConstraintViolation(_)))
        ));
        let (token, permissions) = stored(&store, created.token.id).await;
        assert_eq!(token.token_type, TokenType::ReadOnly);
        assert!(permissions.is_empty());
        assert_eq!(store.permission_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_rename_restores_permissions_of_custom_token() {
        let (manager, store) = setup();
        let created = manager
            .create(create_request("a", TokenType::Custom, Some(&["x", "y"])))
            .await
            .unwrap();
        manager
            .create(create_request("b", TokenType::ReadOnly, None))
            .await
            .unwrap();

        let result = manager
            .update(
                created.token.id,
                UpdateApiToken {
                    name: Some("b".to_string()),
                    token_type: Some(TokenType::ReadOnly),
                    ..UpdateApiToken::default()
                },
            )
            .await;

        assert!(result.is_err());
        let (token, permissions) = stored(&store, created.token.id).await;
        assert_eq!(token.token_type, TokenType::Custom);
        assert_eq!(permissions, actions(&["x", "y"]));
    }

    #[tokio::test]
    async fn test_blank_description_clears_it() {
        let (manager, _) = setup();
        let created = manager
            .create(CreateApiToken {
                description: Some("ci pipeline".to_string()),
                ..create_request("t", TokenType::ReadOnly, None)
            })
            .await
            .unwrap();

        let untouched = manager
            .update(created.token.id, UpdateApiToken::default())
            .await
            .unwrap();
        assert_eq!(untouched.description.as_deref(), Some("ci pipeline"));

        let cleared = manager
            .update(
                created.token.id,
                UpdateApiToken {
                    description: Some("  ".to_string()),
                    ..UpdateApiToken::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.description, None);
    }
}
