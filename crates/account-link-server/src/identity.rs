//! Resource owner authentication
//!
//! The login form and the password grant both go through [`IdentityVerifier`].
//! [`StaticIdentityVerifier`] checks the users listed in `config.json`; the
//! shipped `test`/`test` account is a development placeholder and must be
//! replaced before the server faces real users.

use async_trait::async_trait;
use account_link_core::crypto::constant_time_eq;
use thiserror::Error;

use crate::config::UserCredential;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity backend unavailable: {0}")]
    Backend(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Returns the user id when the credentials are valid, `None` otherwise.
    async fn verify(&self, username: &str, password: &str) -> Result<Option<String>, IdentityError>;
}

/// Checks credentials against a fixed user list
pub struct StaticIdentityVerifier {
    users: Vec<UserCredential>,
}

impl StaticIdentityVerifier {
    pub fn new(users: Vec<UserCredential>) -> Self {
        if users.iter().any(|u| u.username == "test" && u.password == "test") {
            tracing::warn!("Placeholder account test/test is enabled");
        }
        Self { users }
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, username: &str, password: &str) -> Result<Option<String>, IdentityError> {
        // Check every entry so timing does not reveal which usernames exist
        let mut matched = None;
        for user in &self.users {
            let name_ok = constant_time_eq(&user.username, username);
            let password_ok = constant_time_eq(&user.password, password);
            if name_ok && password_ok && matched.is_none() {
                matched = Some(user.username.clone());
            }
        }
        Ok(matched)
    }
}
