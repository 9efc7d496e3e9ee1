//! Owner access for the subscriber list and statistics
//!
//! The owner presents `X-Owner-Email` and `X-Owner-Password` on each
//! request. Without configured credentials the owner views always reject.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::fmt;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::api::AppState;
use crate::error::RegistryError;

pub const OWNER_EMAIL_HEADER: &str = "x-owner-email";
pub const OWNER_PASSWORD_HEADER: &str = "x-owner-password";

/// Configured owner account
#[derive(Clone, Default)]
pub struct OwnerCredentials {
    email: String,
    password: String,
}

impl OwnerCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            password: password.into(),
        }
    }

    /// No owner configured; owner views are closed
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        !self.email.is_empty() && !self.password.is_empty()
    }

    pub fn verify(&self, email: &str, password: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let email_ok = self.email.as_bytes().ct_eq(email.trim().as_bytes());
        let password_ok = self.password.as_bytes().ct_eq(password.as_bytes());
        (email_ok & password_ok).into()
    }
}

impl fmt::Debug for OwnerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerCredentials")
            .field("email", &self.email)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Extractor that admits only the owner
pub struct OwnerAccess;

impl FromRequestParts<AppState> for OwnerAccess {
    type Rejection = RegistryError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let email = header_value(parts, OWNER_EMAIL_HEADER);
        let password = header_value(parts, OWNER_PASSWORD_HEADER);

        if state.owner.verify(email, password) {
            Ok(OwnerAccess)
        } else {
            debug!(path = %parts.uri.path(), "Rejected owner request");
            Err(RegistryError::unauthorized("You must be the owner to access that page."))
        }
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> &'a str {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}
