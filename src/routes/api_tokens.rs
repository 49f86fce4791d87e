/// API Token Routes
///
/// Thin admin surface over `TokenManager`. Handlers only translate between
/// HTTP and the manager; every rule lives in `crate::api_token`.

use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::api_token::{CreateApiToken, TokenCriteria, TokenManager, UpdateApiToken};
use crate::error::AppError;

/// POST /api-tokens
///
/// Creates a token. The response is the only one that ever carries the
/// plaintext `access_key`.
///
/// # Errors
/// - 400: invalid attributes, or permissions that do not fit the type
/// - 409: a token with this name already exists
/// - 500: salt not configured
pub async fn create_api_token(
    body: web::Json<CreateApiToken>,
    manager: web::Data<TokenManager>,
) -> Result<HttpResponse, AppError> {
    let created = manager.create(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(created))
}

/// GET /api-tokens
pub async fn list_api_tokens(manager: web::Data<TokenManager>) -> Result<HttpResponse, AppError> {
    let tokens = manager.list().await?;
    Ok(HttpResponse::Ok().json(tokens))
}

/// GET /api-tokens/{id}
pub async fn get_api_token(
    path: web::Path<Uuid>,
    manager: web::Data<TokenManager>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let token = manager
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("api token {}", id)))?;
    Ok(HttpResponse::Ok().json(token))
}

/// GET /api-tokens/lookup?name=..&type=..
///
/// First token matching the query. An empty query matches nothing.
pub async fn find_api_token(
    criteria: web::Query<TokenCriteria>,
    manager: web::Data<TokenManager>,
) -> Result<HttpResponse, AppError> {
    let token = manager
        .get_by(&criteria)
        .await?
        .ok_or_else(|| AppError::NotFound("api token matching query".to_string()))?;
    Ok(HttpResponse::Ok().json(token))
}

/// PUT /api-tokens/{id}
///
/// # Errors
/// - 400: invalid attributes or permissions for the resulting type
/// - 404: unknown id
/// - 409: name already taken
pub async fn update_api_token(
    path: web::Path<Uuid>,
    body: web::Json<UpdateApiToken>,
    manager: web::Data<TokenManager>,
) -> Result<HttpResponse, AppError> {
    let token = manager.update(path.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(token))
}

/// DELETE /api-tokens/{id}
///
/// Revokes the token and its permissions; responds with the deleted token.
pub async fn revoke_api_token(
    path: web::Path<Uuid>,
    manager: web::Data<TokenManager>,
) -> Result<HttpResponse, AppError> {
    let token = manager.revoke(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(token))
}
