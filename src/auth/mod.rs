/// Authentication module
///
/// Token issuance and verification, refresh-token digests, password
/// verification, the login/registration orchestrator and the refresh
/// rotation protocol.

mod claims;
mod jwt;
mod password;
mod rotation;
mod service;
mod token_hash;

pub use claims::{AccessClaims, ClaimsPayload, RefreshClaims};
pub use jwt::{TokenCodec, TokenPair, LEEWAY_SECONDS};
pub use password::{validate_password_strength, BcryptVerifier, CredentialVerifier};
pub use rotation::RefreshRotation;
pub use service::{AuthOrchestrator, LoginRequest, RegisterRequest};
pub use token_hash::{digests_match, hash_token, token_matches};
