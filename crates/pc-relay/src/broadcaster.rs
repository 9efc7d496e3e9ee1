//! Plan purchase broadcasts
//!
//! Turns a post-commit subscriber snapshot into the `subscriber_created`
//! payload and emits it on the event channel. Publishing never fails the
//! caller: an unreachable channel or a send error drops the event and logs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pc_common::{display_name, AccountType, SubscriberSnapshot, SubscriptionPlan};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

use crate::connection::ConnectionManager;
use crate::error::PublishError;

/// Default event name for plan purchases
pub const SUBSCRIBER_CREATED: &str = "subscriber_created";

/// Wire payload for a plan purchase. Field order is part of the contract.
#[derive(Clone, PartialEq, Serialize)]
pub struct SubscriberCreated {
    pub id: i64,
    pub account_type: AccountType,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub email: String,
    pub telephone: String,
    pub address: String,
    pub organization_name: Option<String>,
    pub subscription_type: SubscriptionPlan,
    pub max_permitted_user_amount: i64,
    pub max_permitted_resource_amount: i64,
    pub created_at: DateTime<Utc>,
    /// Plaintext credential, or empty when absent or suppressed
    pub password: String,
}

impl SubscriberCreated {
    pub fn from_snapshot(snapshot: &SubscriberSnapshot, include_credential: bool) -> Self {
        let password = if include_credential {
            snapshot.credential.clone().unwrap_or_default()
        } else {
            String::new()
        };

        Self {
            id: snapshot.id,
            account_type: snapshot.account_type,
            first_name: snapshot.first_name.clone(),
            last_name: snapshot.last_name.clone(),
            name: display_name(&snapshot.first_name, &snapshot.last_name),
            email: snapshot.email.clone(),
            telephone: snapshot.telephone.clone(),
            address: snapshot.address.clone(),
            organization_name: snapshot.organization_name.clone(),
            subscription_type: snapshot.plan.subscription_type,
            max_permitted_user_amount: snapshot.plan.max_users,
            max_permitted_resource_amount: snapshot.plan.max_resources,
            created_at: snapshot.created_at,
            password,
        }
    }
}

impl fmt::Debug for SubscriberCreated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberCreated")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("subscription_type", &self.subscription_type)
            .finish_non_exhaustive()
    }
}

/// What happened to a single publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    Dropped { reason: String },
}

impl PublishOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, PublishOutcome::Sent)
    }
}

/// Sink for post-commit subscriber snapshots
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event. Never returns an error; failures become `Dropped`.
    async fn publish(&self, event_name: &str, snapshot: &SubscriberSnapshot) -> PublishOutcome;
}

/// Publishes snapshots over the managed event channel
pub struct EventBroadcaster {
    connection: Arc<ConnectionManager>,
    include_credential: bool,
}

impl EventBroadcaster {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            include_credential: true,
        }
    }

    /// Send an empty `password` instead of the submitted credential
    pub fn with_credential_forwarding(mut self, include: bool) -> Self {
        self.include_credential = include;
        self
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    async fn send(&self, event_name: &str, payload: &SubscriberCreated) -> Result<(), PublishError> {
        let channel = self.connection.channel().ok_or(PublishError::ChannelClosed)?;
        let value = serde_json::to_value(payload)?;
        channel.emit(event_name, value).await
    }
}

#[async_trait]
impl EventPublisher for EventBroadcaster {
    async fn publish(&self, event_name: &str, snapshot: &SubscriberSnapshot) -> PublishOutcome {
        let payload = SubscriberCreated::from_snapshot(snapshot, self.include_credential);

        if !self.connection.is_connected() && !self.connection.connect().await {
            error!(
                subscriber_id = payload.id,
                email = %payload.email,
                event = event_name,
                "Event channel unavailable; dropping event"
            );
            return PublishOutcome::Dropped {
                reason: "event channel unavailable".to_string(),
            };
        }

        match self.send(event_name, &payload).await {
            Ok(()) => {
                info!(
                    subscriber_id = payload.id,
                    email = %payload.email,
                    subscription_type = %payload.subscription_type,
                    event = event_name,
                    "Published subscriber event"
                );
                PublishOutcome::Sent
            }
            Err(e) => {
                error!(
                    subscriber_id = payload.id,
                    email = %payload.email,
                    event = event_name,
                    error = %e,
                    "Failed to publish subscriber event"
                );
                PublishOutcome::Dropped {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pc_common::PlanAssignment;

    fn create_test_snapshot(account_type: AccountType, plan: SubscriptionPlan) -> SubscriberSnapshot {
        SubscriberSnapshot {
            id: 42,
            account_type,
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            email: "grace@example.com".to_string(),
            telephone: "555-0100".to_string(),
            address: "1 Navy Way".to_string(),
            organization_name: match account_type {
                AccountType::Organization => Some("COBOL Inc".to_string()),
                AccountType::Personal => None,
            },
            plan: PlanAssignment::for_plan(plan),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            credential: Some("Str0ng!pass".to_string()),
        }
    }

    #[test]
    fn test_payload_mapping() {
        let snapshot = create_test_snapshot(AccountType::Organization, SubscriptionPlan::Pro);
        let payload = SubscriberCreated::from_snapshot(&snapshot, true);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["id"], 42);
        assert_eq!(value["account_type"], "organization");
        assert_eq!(value["name"], "Grace Hopper");
        assert_eq!(value["organization_name"], "COBOL Inc");
        assert_eq!(value["subscription_type"], "pro");
        assert_eq!(value["max_permitted_user_amount"], 50);
        assert_eq!(value["max_permitted_resource_amount"], 30);
        assert_eq!(value["created_at"], "2024-03-01T12:30:00Z");
        assert_eq!(value["password"], "Str0ng!pass");
    }

    #[test]
    fn test_field_order() {
        let snapshot = create_test_snapshot(AccountType::Personal, SubscriptionPlan::Free);
        let json = serde_json::to_string(&SubscriberCreated::from_snapshot(&snapshot, true)).unwrap();

        let keys = [
            "\"id\"",
            "\"account_type\"",
            "\"first_name\"",
            "\"last_name\"",
            "\"name\"",
            "\"email\"",
            "\"telephone\"",
            "\"address\"",
            "\"organization_name\"",
            "\"subscription_type\"",
            "\"max_permitted_user_amount\"",
            "\"max_permitted_resource_amount\"",
            "\"created_at\"",
            "\"password\"",
        ];
        let positions: Vec<usize> = keys.iter().map(|k| json.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "out of order: {}", json);
    }

    #[test]
    fn test_personal_account_has_null_organization() {
        let snapshot = create_test_snapshot(AccountType::Personal, SubscriptionPlan::Basic);
        let value = serde_json::to_value(SubscriberCreated::from_snapshot(&snapshot, true)).unwrap();
        assert!(value["organization_name"].is_null());
        assert_eq!(value["max_permitted_user_amount"], 5);
    }

    #[test]
    fn test_name_is_trimmed() {
        let mut snapshot = create_test_snapshot(AccountType::Personal, SubscriptionPlan::Free);
        snapshot.first_name = String::new();
        let payload = SubscriberCreated::from_snapshot(&snapshot, true);
        assert_eq!(payload.name, "Hopper");
    }

    #[test]
    fn test_credential_absent_or_suppressed_is_empty() {
        let mut snapshot = create_test_snapshot(AccountType::Personal, SubscriptionPlan::Free);
        assert_eq!(SubscriberCreated::from_snapshot(&snapshot, false).password, "");

        snapshot.credential = None;
        assert_eq!(SubscriberCreated::from_snapshot(&snapshot, true).password, "");
    }

    #[test]
    fn test_debug_omits_password() {
        let snapshot = create_test_snapshot(AccountType::Personal, SubscriptionPlan::Free);
        let rendered = format!("{:?}", SubscriberCreated::from_snapshot(&snapshot, true));
        assert!(!rendered.contains("Str0ng!pass"));
        assert!(rendered.contains("grace@example.com"));
    }
}
