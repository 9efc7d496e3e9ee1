//! Registration form validation
//!
//! Rules are checked in a fixed order and the first failure is reported.

use pc_common::AccountType;
use serde::Deserialize;

use crate::error::{RegistryError, Result};

/// Credential strength requirements
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 8 }
    }
}

impl PasswordPolicy {
    /// Lowercase, uppercase, digit and symbol, at least `min_length` characters
    pub fn is_satisfied_by(&self, password: &str) -> bool {
        password.chars().count() >= self.min_length
            && password.chars().any(|c| c.is_ascii_lowercase())
            && password.chars().any(|c| c.is_ascii_uppercase())
            && password.chars().any(|c| c.is_numeric())
            && password.chars().any(is_symbol)
    }

    pub fn validate(&self, password: &str) -> Result<()> {
        if self.is_satisfied_by(password) {
            Ok(())
        } else {
            Err(RegistryError::validation(format!(
                "Password must be at least {} chars long and include one uppercase, \
                 one lowercase, one number, and one symbol.",
                self.min_length
            )))
        }
    }
}

/// Anything that is not a word character
fn is_symbol(c: char) -> bool {
    !(c.is_alphanumeric() || c == '_')
}

/// Raw registration input as submitted
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistrationForm {
    pub account_type: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub telephone: Option<String>,
    pub address: Option<String>,
    pub organization_name: Option<String>,
    pub password: Option<String>,
}

/// A registration that passed validation
#[derive(Clone, PartialEq)]
pub struct NewSubscriber {
    pub account_type: AccountType,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub telephone: String,
    pub address: String,
    /// Only set for organization accounts
    pub organization_name: Option<String>,
    pub password: String,
}

impl std::fmt::Debug for NewSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewSubscriber")
            .field("account_type", &self.account_type)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl RegistrationForm {
    /// Trimmed, non-empty email, if one was submitted
    pub fn email(&self) -> Option<&str> {
        present(&self.email)
    }

    pub fn validate(&self, policy: &PasswordPolicy) -> Result<NewSubscriber> {
        let account_type = self
            .account_type
            .as_deref()
            .map(str::trim)
            .and_then(|value| value.parse::<AccountType>().ok())
            .ok_or_else(|| RegistryError::validation("Invalid account type."))?;

        let first_name = required(&self.first_name, "first_name")?;
        let last_name = required(&self.last_name, "last_name")?;
        let email = required(&self.email, "email")?;
        let telephone = required(&self.telephone, "telephone")?;
        let address = required(&self.address, "address")?;

        // Submitted exactly as typed; whitespace is significant in a credential
        let password = match self.password.as_deref() {
            Some(password) if !password.is_empty() => password.to_string(),
            _ => return Err(missing("password")),
        };
        policy.validate(&password)?;

        let organization_name = match account_type {
            AccountType::Organization => Some(
                present(&self.organization_name)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        RegistryError::validation(
                            "Organization Name is required for organization accounts.",
                        )
                    })?,
            ),
            AccountType::Personal => None,
        };

        Ok(NewSubscriber {
            account_type,
            first_name,
            last_name,
            email,
            telephone,
            address,
            organization_name,
            password,
        })
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    present(value).map(str::to_string).ok_or_else(|| missing(field))
}

/// `first_name` -> "First Name is required."
fn missing(field: &str) -> RegistryError {
    let label = field
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    RegistryError::validation(format!("{} is required.", label))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_form() -> RegistrationForm {
        RegistrationForm {
            account_type: Some("personal".to_string()),
            first_name: Some("Alan".to_string()),
            last_name: Some("Turing".to_string()),
            email: Some("alan@example.com".to_string()),
            telephone: Some("555-0142".to_string()),
            address: Some("Bletchley Park".to_string()),
            organization_name: None,
            password: Some("Enigma#1939".to_string()),
        }
    }

    fn message(err: RegistryError) -> String {
        match err {
            RegistryError::Validation { message } => message,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_personal_form() {
        let new = valid_form().validate(&PasswordPolicy::default()).unwrap();
        assert_eq!(new.account_type, AccountType::Personal);
        assert_eq!(new.email, "alan@example.com");
        assert!(new.organization_name.is_none());
    }

    #[test]
    fn test_personal_account_ignores_organization_name() {
        let mut form = valid_form();
        form.organization_name = Some("GCHQ".to_string());
        let new = form.validate(&PasswordPolicy::default()).unwrap();
        assert!(new.organization_name.is_none());
    }

    #[test]
    fn test_account_type_checked_first() {
        let mut form = valid_form();
        form.account_type = Some("team".to_string());
        form.first_name = None;
        let err = form.validate(&PasswordPolicy::default()).unwrap_err();
        assert_eq!(message(err), "Invalid account type.");
    }

    #[test]
    fn test_required_fields_in_order() {
        let mut form = valid_form();
        form.first_name = Some("   ".to_string());
        form.address = None;
        assert_eq!(
            message(form.validate(&PasswordPolicy::default()).unwrap_err()),
            "First Name is required."
        );

        let mut form = valid_form();
        form.telephone = None;
        assert_eq!(
            message(form.validate(&PasswordPolicy::default()).unwrap_err()),
            "Telephone is required."
        );

        let mut form = valid_form();
        form.password = Some(String::new());
        assert_eq!(
            message(form.validate(&PasswordPolicy::default()).unwrap_err()),
            "Password is required."
        );
    }

    #[test]
    fn test_password_policy() {
        let policy = PasswordPolicy::default();
        assert!(policy.is_satisfied_by("Enigma#1939"));
        assert!(policy.is_satisfied_by("Aa1 bbbb"));
        assert!(!policy.is_satisfied_by("Aa1!"));
        assert!(!policy.is_satisfied_by("enigma#1939"));
        assert!(!policy.is_satisfied_by("ENIGMA#1939"));
        assert!(!policy.is_satisfied_by("Enigma#abcd"));
        // Underscore is a word character, not a symbol
        assert!(!policy.is_satisfied_by("Enigma_1939"));
    }

    #[test]
    fn test_weak_password_rejected() {
        let mut form = valid_form();
        form.password = Some("password".to_string());
        let text = message(form.validate(&PasswordPolicy::default()).unwrap_err());
        assert!(text.starts_with("Password must be at least 8 chars"));
    }

    #[test]
    fn test_organization_requires_name() {
        let mut form = valid_form();
        form.account_type = Some("organization".to_string());
        assert_eq!(
            message(form.validate(&PasswordPolicy::default()).unwrap_err()),
            "Organization Name is required for organization accounts."
        );

        form.organization_name = Some("Hut 8".to_string());
        let new = form.validate(&PasswordPolicy::default()).unwrap();
        assert_eq!(new.organization_name.as_deref(), Some("Hut 8"));
    }
}
