/// Access key generation and hashing
///
/// Access keys are:
/// - 128 bytes from the operating system CSPRNG, hex encoded
/// - Returned to the caller once, at creation
/// - Stored only as HMAC-SHA512(salt, key), hex encoded

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;

use crate::configuration::{ConfigurationProvider, API_TOKEN_SALT_KEY};
use crate::error::{AppError, ConfigError};

type HmacSha512 = Hmac<Sha512>;

/// Bytes of entropy in every access key
pub const ACCESS_KEY_BYTES: usize = 128;

/// Legacy environment variable that used to carry the salt
pub const LEGACY_SALT_ENV: &str = "API_TOKEN_SALT";

/// Generate a new access key
///
/// # Errors
/// Returns error if the operating system cannot supply entropy. There is no
/// weaker fallback source.
pub fn generate_secret() -> Result<String, AppError> {
    let mut bytes = [0u8; ACCESS_KEY_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AppError::Internal(format!("Entropy source unavailable: {}", e)))?;
    Ok(hex::encode(bytes))
}

/// Hash an access key with the given salt
///
/// # Errors
/// Returns a configuration error if `salt` is empty
pub fn hash(secret: &str, salt: &str) -> Result<String, AppError> {
    if salt.is_empty() {
        return Err(missing_salt());
    }

    let mut mac = HmacSha512::new_from_slice(salt.as_bytes())
        .map_err(|e| AppError::Internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(secret.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Read the configured salt
pub fn configured_salt(config: &dyn ConfigurationProvider) -> Result<String, AppError> {
    config
        .get(API_TOKEN_SALT_KEY)
        .filter(|salt| !salt.is_empty())
        .ok_or_else(missing_salt)
}

/// Make sure a salt is configured before any token is hashed.
///
/// Resolution order: `api_token.salt`, then the deprecated `legacy` value,
/// which is written back into the configuration.
pub fn ensure_salt_configured(
    config: &dyn ConfigurationProvider,
    legacy: Option<String>,
) -> Result<(), AppError> {
    if configured_salt(config).is_ok() {
        return Ok(());
    }

    match legacy.filter(|salt| !salt.is_empty()) {
        Some(salt) => {
            tracing::warn!(
                legacy_variable = LEGACY_SALT_ENV,
                config_key = API_TOKEN_SALT_KEY,
                "Reading the API token salt from a deprecated environment variable; \
                 move it to `api_token.salt` (or APP_API_TOKEN__SALT)"
            );
            config.set(API_TOKEN_SALT_KEY, salt);
            Ok(())
        }
        None => Err(missing_salt()),
    }
}

/// [`ensure_salt_configured`] with the legacy value read from the environment
pub fn ensure_salt_configured_from_env(config: &dyn ConfigurationProvider) -> Result<(), AppError> {
    ensure_salt_configured(config, std::env::var(LEGACY_SALT_ENV).ok())
}

fn missing_salt() -> AppError {
    AppError::Config(ConfigError::MissingRequired(format!(
        "{} is not set; add `api_token.salt` to configuration.yaml or export APP_API_TOKEN__SALT \
         with a long random value",
        API_TOKEN_SALT_KEY
    )))
}
