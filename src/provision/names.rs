//! Generated identifiers and credentials for tenant databases.

use crate::error::{SchemaError, SchemaResult};
use rand::Rng;
use rand::seq::SliceRandom;

pub const DATABASE_PREFIX: &str = "schemasense_user_";
pub const ROLE_PREFIX: &str = "schemasense_u_";

const ID_HEX_LEN: usize = 6;
const PASSWORD_LEN: usize = 32;
const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*-_=+";

/// PostgreSQL's identifier length limit.
const MAX_USERNAME_LEN: usize = 63;

/// Database and role names derived from one random identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantNames {
    pub id: String,
    pub database: String,
    pub role: String,
}

impl TenantNames {
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            database: format!("{}{}", DATABASE_PREFIX, id),
            role: format!("{}{}", ROLE_PREFIX, id),
            id,
        }
    }

    pub fn generate() -> Self {
        Self::from_id(short_id())
    }
}

/// Six lowercase hex characters.
pub fn short_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_HEX_LEN)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}

/// A random password drawn from letters, digits and `!@#$%^&*-_=+`.
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LEN)
        .filter_map(|_| PASSWORD_ALPHABET.choose(&mut rng).map(|b| *b as char))
        .collect()
}

/// Check a login name against `^[A-Za-z_][A-Za-z0-9_]{0,62}$`.
///
/// # Examples
///
/// ```
/// use schemasense_core::provision::names::validate_username;
///
/// assert!(validate_username("analyst_2").is_ok());
/// assert!(validate_username("2fast").is_err());
/// assert!(validate_username("bob; DROP ROLE admin").is_err());
/// ```
pub fn validate_username(username: &str) -> SchemaResult<()> {
    let mut chars = username.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                && username.len() <= MAX_USERNAME_LEN
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(SchemaError::invalid_input(format!(
            "invalid username '{}': use letters, digits and underscores, starting with a letter or underscore (max {} characters)",
            username, MAX_USERNAME_LEN
        )))
    }
}
