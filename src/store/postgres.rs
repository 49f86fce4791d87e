use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{PermissionRepository, TokenRepository};
use crate::api_token::{
    ApiToken, NewApiToken, OrderBy, Permission, TokenChanges, TokenCriteria, TokenType,
};
use crate::error::{AppError, DatabaseError};

/// PostgreSQL-backed store. Schema lives in `migrations/`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    #[sqlx(rename = "type")]
    token_type: String,
    access_key_hash: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TokenRow> for ApiToken {
    type Error = AppError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let token_type = row.token_type.parse::<TokenType>().map_err(|_| {
            AppError::Database(DatabaseError::QueryExecution(format!(
                "unknown token type '{}' stored for token {}",
                row.token_type, row.id
            )))
        })?;

        Ok(ApiToken {
            id: row.id,
            name: row.name,
            description: row.description,
            token_type,
            access_key_hash: row.access_key_hash,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PermissionRow {
    id: Uuid,
    token_id: Uuid,
    action: String,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Permission {
            id: row.id,
            token_id: row.token_id,
            action: row.action,
        }
    }
}

const TOKEN_COLUMNS: &str = "id, name, description, type, access_key_hash, created_at";

// Unset criteria bind as NULL and match every row
const CRITERIA_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR id = $1)
      AND ($2::text IS NULL OR name = $2)
      AND ($3::text IS NULL OR type = $3)
      AND ($4::text IS NULL OR access_key_hash = $4)
"#;

fn order_clause(order: OrderBy) -> &'static str {
    match order {
        OrderBy::Name => "ORDER BY name ASC",
        OrderBy::CreatedAt => "ORDER BY created_at ASC",
    }
}

#[async_trait]
impl TokenRepository for PostgresStore {
    async fn find_one(&self, criteria: &TokenCriteria) -> Result<Option<ApiToken>, AppError> {
        let query = format!(
            "SELECT {} FROM api_tokens {} {} LIMIT 1",
            TOKEN_COLUMNS,
            CRITERIA_FILTER,
            order_clause(OrderBy::Name)
        );

        let row = sqlx::query_as::<_, TokenRow>(&query)
            .bind(criteria.id)
            .bind(criteria.name.as_deref())
            .bind(criteria.token_type.map(|t| t.as_str()))
            .bind(criteria.access_key_hash.as_deref())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ApiToken::try_from).transpose()
    }

    async fn find_many(
        &self,
        criteria: &TokenCriteria,
        order: OrderBy,
    ) -> Result<Vec<ApiToken>, AppError> {
        let query = format!(
            "SELECT {} FROM api_tokens {} {}",
            TOKEN_COLUMNS,
            CRITERIA_FILTER,
            order_clause(order)
        );

        let rows = sqlx::query_as::<_, TokenRow>(&query)
            .bind(criteria.id)
            .bind(criteria.name.as_deref())
            .bind(criteria.token_type.map(|t| t.as_str()))
            .bind(criteria.access_key_hash.as_deref())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ApiToken::try_from).collect()
    }

    async fn create(&self, token: NewApiToken) -> Result<ApiToken, AppError> {
        let query = format!(
            r#"
            INSERT INTO api_tokens (id, name, description, type, access_key_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            TOKEN_COLUMNS
        );

        let row = sqlx::query_as::<_, TokenRow>(&query)
            .bind(Uuid::new_v4())
            .bind(&token.name)
            .bind(&token.description)
            .bind(token.token_type.as_str())
            .bind(&token.access_key_hash)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?;

        ApiToken::try_from(row)
    }

    async fn update(&self, id: Uuid, changes: &TokenChanges) -> Result<Option<ApiToken>, AppError> {
        let query = format!(
            r#"
            UPDATE api_tokens
            SET name = COALESCE($2, name),
                description = CASE WHEN $5 THEN $3 ELSE description END,
                type = COALESCE($4, type)
            WHERE id = $1
            RETURNING {}
            "#,
            TOKEN_COLUMNS
        );

        let row = sqlx::query_as::<_, TokenRow>(&query)
            .bind(id)
            .bind(changes.name.as_deref())
            .bind(changes.description.clone().flatten())
            .bind(changes.token_type.map(|t| t.as_str()))
            .bind(changes.description.is_some())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ApiToken::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<Option<ApiToken>, AppError> {
        let query = format!("DELETE FROM api_tokens WHERE id = $1 RETURNING {}", TOKEN_COLUMNS);

        let row = sqlx::query_as::<_, TokenRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ApiToken::try_from).transpose()
    }
}

#[async_trait]
impl PermissionRepository for PostgresStore {
    async fn find_for_token(&self, token_id: Uuid) -> Result<Vec<Permission>, AppError> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT id, token_id, action
            FROM api_token_permissions
            WHERE token_id = $1
            ORDER BY action
            "#,
        )
        .bind(token_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }

    async fn create_many(
        &self,
        token_id: Uuid,
        actions: &[String],
    ) -> Result<Vec<Permission>, AppError> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = actions.iter().map(|_| Uuid::new_v4()).collect();

        // One statement, so the batch is all-or-nothing
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            INSERT INTO api_token_permissions (id, token_id, action, created_at)
            SELECT new.id, $2, new.action, $4
            FROM UNNEST($1::uuid[], $3::text[]) AS new(id, action)
            RETURNING id, token_id, action
            "#,
        )
        .bind(&ids)
        .bind(token_id)
        .bind(actions)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }

    async fn delete_many(&self, ids: &[Uuid]) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM api_token_permissions WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_for_token(&self, token_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM api_token_permissions WHERE token_id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(token_id = %token_id, removed = result.rows_affected(), "Permissions cleared");
        Ok(result.rows_affected())
    }
}
