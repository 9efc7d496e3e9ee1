use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod logging;

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Unknown account type: {0}")]
    UnknownAccountType(String),

    #[error("Unknown subscription plan: {0}")]
    UnknownPlan(String),

    /// subscription_type, max_users and max_resources must be set together
    #[error("Partial plan assignment (subscription_type={subscription_type:?}, max_users={max_users:?}, max_resources={max_resources:?})")]
    PartialPlan {
        subscription_type: Option<String>,
        max_users: Option<i64>,
        max_resources: Option<i64>,
    },
}

// ============================================================================
// Account and Plan Types
// ============================================================================

/// Kind of account a subscriber registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Personal,
    Organization,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Personal => "personal",
            AccountType::Organization => "organization",
        }
    }

    /// Plans this account type may purchase. Personal accounts never reach enterprise.
    pub fn admissible_plans(&self) -> &'static [SubscriptionPlan] {
        match self {
            AccountType::Personal => &[
                SubscriptionPlan::Free,
                SubscriptionPlan::Basic,
                SubscriptionPlan::Pro,
            ],
            AccountType::Organization => &SubscriptionPlan::ALL,
        }
    }

    pub fn admits(&self, plan: SubscriptionPlan) -> bool {
        self.admissible_plans().contains(&plan)
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(AccountType::Personal),
            "organization" => Ok(AccountType::Organization),
            other => Err(DomainError::UnknownAccountType(other.to_string())),
        }
    }
}

/// Subscription plan tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    Free,
    Basic,
    Pro,
    Enterprise,
}

/// User and resource ceilings granted by a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub max_users: i64,
    pub max_resources: i64,
}

impl SubscriptionPlan {
    pub const ALL: [SubscriptionPlan; 4] = [
        SubscriptionPlan::Free,
        SubscriptionPlan::Basic,
        SubscriptionPlan::Pro,
        SubscriptionPlan::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPlan::Free => "free",
            SubscriptionPlan::Basic => "basic",
            SubscriptionPlan::Pro => "pro",
            SubscriptionPlan::Enterprise => "enterprise",
        }
    }

    pub fn limits(&self) -> PlanLimits {
        match self {
            SubscriptionPlan::Free => PlanLimits { max_users: 1, max_resources: 5 },
            SubscriptionPlan::Basic => PlanLimits { max_users: 5, max_resources: 5 },
            SubscriptionPlan::Pro => PlanLimits { max_users: 50, max_resources: 30 },
            SubscriptionPlan::Enterprise => PlanLimits { max_users: 10000, max_resources: 1000 },
        }
    }
}

impl fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionPlan {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(SubscriptionPlan::Free),
            "basic" => Ok(SubscriptionPlan::Basic),
            "pro" => Ok(SubscriptionPlan::Pro),
            "enterprise" => Ok(SubscriptionPlan::Enterprise),
            other => Err(DomainError::UnknownPlan(other.to_string())),
        }
    }
}

/// A purchased plan together with its limits.
///
/// The three values are always present together; a subscriber either has a
/// complete assignment or none at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAssignment {
    pub subscription_type: SubscriptionPlan,
    pub max_users: i64,
    pub max_resources: i64,
}

impl PlanAssignment {
    /// Assignment with the standard limits of `plan`
    pub fn for_plan(plan: SubscriptionPlan) -> Self {
        let limits = plan.limits();
        Self {
            subscription_type: plan,
            max_users: limits.max_users,
            max_resources: limits.max_resources,
        }
    }

    /// Rebuild an assignment from three nullable storage columns.
    pub fn from_parts(
        subscription_type: Option<&str>,
        max_users: Option<i64>,
        max_resources: Option<i64>,
    ) -> Result<Option<Self>, DomainError> {
        match (subscription_type, max_users, max_resources) {
            (None, None, None) => Ok(None),
            (Some(plan), Some(max_users), Some(max_resources)) => Ok(Some(Self {
                subscription_type: plan.parse()?,
                max_users,
                max_resources,
            })),
            (subscription_type, max_users, max_resources) => Err(DomainError::PartialPlan {
                subscription_type: subscription_type.map(str::to_string),
                max_users,
                max_resources,
            }),
        }
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// A registered account. Owned by the persistence store.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub id: i64,
    pub account_type: AccountType,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub telephone: String,
    pub address: String,
    /// Only set for organization accounts
    pub organization_name: Option<String>,
    /// Argon2id PHC string
    pub password_hash: String,
    pub plan: Option<PlanAssignment>,
    pub created_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn display_name(&self) -> String {
        display_name(&self.first_name, &self.last_name)
    }

    pub fn subscription_type(&self) -> Option<SubscriptionPlan> {
        self.plan.map(|p| p.subscription_type)
    }

    /// Capture an immutable copy for broadcasting.
    ///
    /// Returns `None` when no plan has been purchased yet.
    pub fn snapshot(&self, credential: Option<String>) -> Option<SubscriberSnapshot> {
        let plan = self.plan?;
        Some(SubscriberSnapshot {
            id: self.id,
            account_type: self.account_type,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            telephone: self.telephone.clone(),
            address: self.address.clone(),
            organization_name: self.organization_name.clone(),
            plan,
            created_at: self.created_at,
            credential,
        })
    }
}

/// `trim(first_name + " " + last_name)`
pub fn display_name(first_name: &str, last_name: &str) -> String {
    format!("{} {}", first_name, last_name).trim().to_string()
}

/// Point-in-time copy of a subscriber taken right after a plan purchase commits.
#[derive(Clone, PartialEq)]
pub struct SubscriberSnapshot {
    pub id: i64,
    pub account_type: AccountType,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub telephone: String,
    pub address: String,
    pub organization_name: Option<String>,
    pub plan: PlanAssignment,
    pub created_at: DateTime<Utc>,
    /// Plaintext credential supplied at submission time, if any
    pub credential: Option<String>,
}

impl fmt::Debug for SubscriberSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSnapshot")
            .field("id", &self.id)
            .field("account_type", &self.account_type)
            .field("email", &self.email)
            .field("plan", &self.plan)
            .field("created_at", &self.created_at)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}
