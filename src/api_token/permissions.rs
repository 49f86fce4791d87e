use crate::api_token::model::TokenType;
use crate::error::ValidationError;

/// Check that a permission list fits the token type.
///
/// Only custom tokens carry explicit permissions, and they must carry at
/// least one. An empty list on a non-custom token is the same as none.
pub fn validate_permissions(
    token_type: TokenType,
    permissions: Option<&[String]>,
) -> Result<(), ValidationError> {
    let has_permissions = permissions.map_or(false, |p| !p.is_empty());

    match (token_type.is_custom(), has_permissions) {
        (false, true) => Err(ValidationError::InvalidPermissions),
        (true, false) => Err(ValidationError::MissingPermissions),
        _ => Ok(()),
    }
}
