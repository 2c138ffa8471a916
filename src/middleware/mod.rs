/// Middleware module
///
/// Request gating by access token and role policy.

mod authorization;

pub use authorization::{GateConfig, Policy, RequireAuth};
