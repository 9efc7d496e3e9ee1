//! Plancast Registry
//!
//! Subscriber registration, plan selection and purchase. A committed purchase
//! is handed to the relay dispatcher for broadcast on the internal channel.

pub mod api;
pub mod error;
pub mod owner;
pub mod password;
pub mod repository;
pub mod service;
pub mod validation;

pub use api::{subscribers_router, AppState};
pub use error::{RegistryError, Result};
pub use owner::{OwnerAccess, OwnerCredentials, OWNER_EMAIL_HEADER, OWNER_PASSWORD_HEADER};
pub use password::{Argon2Config, CredentialVerifier, PasswordService};
pub use repository::{SqliteSubscriberRepository, SubscriberDraft, SubscriberRepository};
pub use service::{PlanSelection, PlanState, PlanStatistics, SubscriptionService};
pub use validation::{NewSubscriber, PasswordPolicy, RegistrationForm};
