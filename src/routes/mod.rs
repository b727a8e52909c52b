mod account;
mod auth;
mod health_check;

pub use account::{delete_account, get_current_user, logout, revoke_token, update_password};
pub use auth::{check_token, login, refresh, register, token_revoked};
pub use health_check::health_check;
