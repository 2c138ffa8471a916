/// Password Hashing and Verification
///
/// `CredentialVerifier` is the seam the login flow uses; `BcryptVerifier`
/// is the production implementation.

use bcrypt::{hash, verify};

use crate::error::{AppError, ValidationError};

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;

/// Opaque password hashing capability
pub trait CredentialVerifier: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, AppError>;

    /// Returns `Ok(false)` on mismatch. Errors only on a corrupt digest.
    fn verify(&self, digest: &str, password: &str) -> Result<bool, AppError>;
}

/// Bcrypt-backed credential verifier
#[derive(Debug, Clone)]
pub struct BcryptVerifier {
    cost: u32,
}

impl BcryptVerifier {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptVerifier {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl CredentialVerifier for BcryptVerifier {
    fn hash(&self, password: &str) -> Result<String, AppError> {
        if password.is_empty() {
            return Err(AppError::Validation(ValidationError::EmptyField(
                "password".to_string(),
            )));
        }
        hash(password, self.cost)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    fn verify(&self, digest: &str, password: &str) -> Result<bool, AppError> {
        if digest.is_empty() || password.is_empty() {
            return Ok(false);
        }
        verify(password, digest)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
    }
}

/// Validate password strength requirements
///
/// Requirements:
/// - Minimum 8 characters
/// - Maximum 128 characters
/// - At least one digit
/// - At least one lowercase letter
/// - At least one uppercase letter
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort(
            "password".to_string(),
            MIN_PASSWORD_LENGTH,
        ));
    }

    // bcrypt limitation and DoS prevention
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong(
            "password".to_string(),
            MAX_PASSWORD_LENGTH,
        ));
    }

    let has_digit = password.chars().any(|c| c.is_numeric());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_uppercase());

    if !has_digit || !has_lowercase || !has_uppercase {
        return Err(ValidationError::InvalidFormat(
            "password must contain at least one digit, one lowercase letter, and one uppercase letter"
                .to_string(),
        ));
    }

    Ok(())
}
