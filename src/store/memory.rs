use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{PermissionRepository, TokenRepository};
use crate::api_token::{ApiToken, NewApiToken, OrderBy, Permission, TokenChanges, TokenCriteria};
use crate::error::{AppError, DatabaseError};

#[derive(Debug, Default)]
struct State {
    tokens: HashMap<Uuid, ApiToken>,
    permissions: HashMap<Uuid, Permission>,
}

impl State {
    fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.tokens
            .values()
            .any(|t| t.name == name && Some(t.id) != except)
    }
}

/// Process-local store with the same constraints as the Postgres schema.
///
/// Clones share state, so one instance can back both repository traits.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored permission rows, across all tokens
    pub fn permission_count(&self) -> Result<usize, AppError> {
        Ok(self.lock()?.permissions.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("in-memory store lock poisoned".to_string()))
    }
}

fn duplicate(constraint: &str) -> AppError {
    AppError::Database(DatabaseError::UniqueConstraintViolation(
        constraint.to_string(),
    ))
}

#[async_trait]
impl TokenRepository for InMemoryStore {
    async fn find_one(&self, criteria: &TokenCriteria) -> Result<Option<ApiToken>, AppError> {
        let state = self.lock()?;
        // Same tie-break as the Postgres query: first by name
        Ok(state
            .tokens
            .values()
            .filter(|t| criteria.matches(t))
            .min_by(|a, b| a.name.cmp(&b.name))
            .cloned())
    }

    async fn find_many(
        &self,
        criteria: &TokenCriteria,
        order: OrderBy,
    ) -> Result<Vec<ApiToken>, AppError> {
        let state = self.lock()?;
        let mut tokens: Vec<ApiToken> = state
            .tokens
            .values()
            .filter(|t| criteria.matches(t))
            .cloned()
            .collect();

        match order {
            OrderBy::Name => tokens.sort_by(|a, b| a.name.cmp(&b.name)),
            OrderBy::CreatedAt => tokens.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }
        Ok(tokens)
    }

    async fn create(&self, token: NewApiToken) -> Result<ApiToken, AppError> {
        let mut state = self.lock()?;

        if state.name_taken(&token.name, None) {
            return Err(duplicate("api_tokens_name_key"));
        }
        if state
            .tokens
            .values()
            .any(|t| t.access_key_hash == token.access_key_hash)
        {
            return Err(duplicate("api_tokens_access_key_hash_key"));
        }

        let stored = ApiToken {
            id: Uuid::new_v4(),
            name: token.name,
            description: token.description,
            token_type: token.token_type,
            access_key_hash: token.access_key_hash,
            created_at: Utc::now(),
        };
        state.tokens.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, id: Uuid, changes: &TokenChanges) -> Result<Option<ApiToken>, AppError> {
        let mut state = self.lock()?;

        if let Some(name) = &changes.name {
            if state.name_taken(name, Some(id)) {
                return Err(duplicate("api_tokens_name_key"));
            }
        }

        let token = match state.tokens.get_mut(&id) {
            Some(token) => token,
            None => return Ok(None),
        };
        if let Some(name) = &changes.name {
            token.name = name.clone();
        }
        if let Some(description) = &changes.description {
            token.description = description.clone();
        }
        if let Some(token_type) = changes.token_type {
            token.token_type = token_type;
        }
        Ok(Some(token.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<Option<ApiToken>, AppError> {
        let mut state = self.lock()?;
        let removed = state.tokens.remove(&id);
        if removed.is_some() {
            // ON DELETE CASCADE
            state.permissions.retain(|_, p| p.token_id != id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl PermissionRepository for InMemoryStore {
    async fn find_for_token(&self, token_id: Uuid) -> Result<Vec<Permission>, AppError> {
        let state = self.lock()?;
        Ok(state
            .permissions
            .values()
            .filter(|p| p.token_id == token_id)
            .cloned()
            .collect())
    }

    async fn create_many(
        &self,
        token_id: Uuid,
        actions: &[String],
    ) -> Result<Vec<Permission>, AppError> {
        let mut state = self.lock()?;

        if !state.tokens.contains_key(&token_id) {
            return Err(AppError::Database(DatabaseError::QueryExecution(format!(
                "api_token_permissions_token_id_fkey: token {} does not exist",
                token_id
            ))));
        }

        // All-or-nothing, like a single multi-row INSERT
        let mut seen: HashSet<&str> = state
            .permissions
            .values()
            .filter(|p| p.token_id == token_id)
            .map(|p| p.action.as_str())
            .collect();
        for action in actions {
            if !seen.insert(action.as_str()) {
                return Err(duplicate("api_token_permissions_token_id_action_key"));
            }
        }

        let created: Vec<Permission> = actions
            .iter()
            .map(|action| Permission {
                id: Uuid::new_v4(),
                token_id,
                action: action.clone(),
            })
            .collect();
        for permission in &created {
            state.permissions.insert(permission.id, permission.clone());
        }
        Ok(created)
    }

    async fn delete_many(&self, ids: &[Uuid]) -> Result<u64, AppError> {
        let mut state = self.lock()?;
        let removed = ids
            .iter()
            .filter(|id| state.permissions.remove(*id).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn delete_for_token(&self, token_id: Uuid) -> Result<u64, AppError> {
        let mut state = self.lock()?;
        let before = state.permissions.len();
        state.permissions.retain(|_, p| p.token_id != token_id);
        Ok((before - state.permissions.len()) as u64)
    }
}
