//! User aggregate and row-level validation
//!
//! A user is valid iff its email parses and every address has all fields
//! non-empty after trimming. Construction goes through [`User::new`] so the
//! import pipeline cannot buffer an invalid aggregate.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// RFC 4122 variant-1 UUID shape. Shared by the user lookup validation and
/// the bulk importer's staging SQL, which keys users on this exact pattern.
pub const UUID_PATTERN: &str =
    "^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[1-5][0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$";

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Compiled [`UUID_PATTERN`].
pub fn uuid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(UUID_PATTERN).expect("hard-coded uuid pattern"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("hard-coded email pattern"))
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid email")]
    InvalidEmail,
    #[error("invalid address")]
    InvalidAddress,
}

/// Postal address belonging to exactly one user. Addresses are replaced
/// wholesale on every re-import of their owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

impl Address {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.street.trim().is_empty()
            || self.city.trim().is_empty()
            || self.state.trim().is_empty()
            || self.zip_code.trim().is_empty()
            || self.country.trim().is_empty()
        {
            return Err(ValidationError::InvalidAddress);
        }
        Ok(())
    }
}

/// User aggregate as it flows through the import pipeline.
///
/// `id` is the external identifier from the source file; it may be empty or
/// not a UUID, in which case the user is keyed by email on merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub addresses: Vec<Address>,
}

impl User {
    pub fn new(
        id: String,
        name: String,
        email: String,
        phone_number: String,
        addresses: Vec<Address>,
    ) -> Result<Self, ValidationError> {
        if !email_pattern().is_match(&email) {
            return Err(ValidationError::InvalidEmail);
        }

        for address in &addresses {
            address.validate()?;
        }

        Ok(Self {
            id,
            name,
            email,
            phone_number,
            addresses,
        })
    }
}
