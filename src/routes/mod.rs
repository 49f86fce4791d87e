mod api_tokens;
mod health_check;

pub use api_tokens::{
    create_api_token, find_api_token, get_api_token, list_api_tokens, revoke_api_token,
    update_api_token,
};
pub use health_check::health_check;
