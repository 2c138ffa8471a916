mod auth;
mod health_check;
mod sessions;

pub use auth::{login, logout, me, refresh, register};
pub use health_check::health_check;
pub use sessions::{admin_list_sessions, admin_revoke_session, list_my_sessions, revoke_my_session};
