//! Subscriber plan lifecycle
//!
//! ```text
//! Unregistered --register--> Registered --select_plan--> PlanSelected --purchase--> Active(plan)
//!                                  ^                                                  |
//!                                  +------------- select_plan (re-purchase) ----------+
//! ```
//!
//! `purchase` commits the plan first and only then hands a snapshot of the
//! committed row to the dispatcher. Broadcast failures never reach the caller.

use chrono::Utc;
use pc_common::{AccountType, PlanAssignment, Subscriber, SubscriptionPlan};
use pc_relay::{AsyncDispatcher, SubmitOutcome};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{RegistryError, Result};
use crate::password::CredentialVerifier;
use crate::repository::{SubscriberDraft, SubscriberRepository};
use crate::validation::{PasswordPolicy, RegistrationForm};

/// Where a registered subscriber is in the plan lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PlanState {
    Registered,
    Active { plan: PlanAssignment },
}

impl PlanState {
    pub fn of(subscriber: &Subscriber) -> Self {
        match subscriber.plan {
            Some(plan) => PlanState::Active { plan },
            None => PlanState::Registered,
        }
    }
}

/// An admissible plan chosen by a subscriber, awaiting purchase.
///
/// Only `SubscriptionService::select_plan` creates these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSelection {
    subscriber_id: i64,
    plan: SubscriptionPlan,
}

impl PlanSelection {
    pub fn subscriber_id(&self) -> i64 {
        self.subscriber_id
    }

    pub fn plan(&self) -> SubscriptionPlan {
        self.plan
    }
}

/// Subscriber counts per account type and plan; `none` counts subscribers without a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanStatistics {
    pub personal_total: u64,
    pub organization_total: u64,
    pub personal: BTreeMap<String, u64>,
    pub organization: BTreeMap<String, u64>,
}

impl PlanStatistics {
    fn empty() -> Self {
        let buckets = |account_type: AccountType| {
            account_type
                .admissible_plans()
                .iter()
                .map(|plan| plan.as_str())
                .chain(std::iter::once("none"))
                .map(|key| (key.to_string(), 0))
                .collect::<BTreeMap<_, _>>()
        };
        Self {
            personal_total: 0,
            organization_total: 0,
            personal: buckets(AccountType::Personal),
            organization: buckets(AccountType::Organization),
        }
    }

    fn record(&mut self, subscriber: &Subscriber) {
        let key = subscriber
            .subscription_type()
            .map(|plan| plan.as_str())
            .unwrap_or("none")
            .to_string();
        let (total, buckets) = match subscriber.account_type {
            AccountType::Personal => (&mut self.personal_total, &mut self.personal),
            AccountType::Organization => (&mut self.organization_total, &mut self.organization),
        };
        *total += 1;
        *buckets.entry(key).or_insert(0) += 1;
    }
}

/// Registration, authentication and plan purchases
pub struct SubscriptionService {
    repository: Arc<dyn SubscriberRepository>,
    credentials: Arc<dyn CredentialVerifier>,
    policy: PasswordPolicy,
    dispatcher: AsyncDispatcher,
}

impl SubscriptionService {
    pub fn new(
        repository: Arc<dyn SubscriberRepository>,
        credentials: Arc<dyn CredentialVerifier>,
        policy: PasswordPolicy,
        dispatcher: AsyncDispatcher,
    ) -> Self {
        Self {
            repository,
            credentials,
            policy,
            dispatcher,
        }
    }

    /// Unregistered -> Registered
    pub async fn register(&self, form: RegistrationForm) -> Result<Subscriber> {
        if let Some(email) = form.email() {
            if self.repository.find_by_email(email).await?.is_some() {
                return Err(RegistryError::duplicate_email(email));
            }
        }

        let new = form.validate(&self.policy)?;
        let password_hash = self.credentials.hash(&new.password)?;

        let subscriber = self
            .repository
            .insert(SubscriberDraft {
                account_type: new.account_type,
                first_name: new.first_name,
                last_name: new.last_name,
                email: new.email,
                telephone: new.telephone,
                address: new.address,
                organization_name: new.organization_name,
                password_hash,
                created_at: Utc::now(),
            })
            .await?;

        info!(
            subscriber_id = subscriber.id,
            email = %subscriber.email,
            account_type = %subscriber.account_type,
            "Subscriber registered"
        );
        Ok(subscriber)
    }

    /// Verify a returning subscriber's credentials
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Subscriber> {
        let subscriber = self
            .repository
            .find_by_email(email.trim())
            .await?
            .ok_or(RegistryError::InvalidCredentials)?;

        if !self.credentials.verify(password, &subscriber.password_hash)? {
            debug!(subscriber_id = subscriber.id, "Rejected login");
            return Err(RegistryError::InvalidCredentials);
        }

        info!(subscriber_id = subscriber.id, "Subscriber logged in");
        Ok(subscriber)
    }

    pub async fn get(&self, id: i64) -> Result<Subscriber> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or(RegistryError::NotFound { id })
    }

    /// Newest first
    pub async fn list_all(&self) -> Result<Vec<Subscriber>> {
        self.repository.list_all().await
    }

    pub async fn plan_state(&self, id: i64) -> Result<PlanState> {
        Ok(PlanState::of(&self.get(id).await?))
    }

    /// Plans the subscriber's account type may purchase
    pub async fn available_plans(&self, id: i64) -> Result<&'static [SubscriptionPlan]> {
        Ok(self.get(id).await?.account_type.admissible_plans())
    }

    /// Registered or Active -> PlanSelected
    pub async fn select_plan(&self, id: i64, plan: SubscriptionPlan) -> Result<PlanSelection> {
        let subscriber = self.get(id).await?;
        if !subscriber.account_type.admits(plan) {
            return Err(RegistryError::PlanNotAdmissible {
                plan,
                account_type: subscriber.account_type,
            });
        }

        Ok(PlanSelection {
            subscriber_id: id,
            plan,
        })
    }

    /// PlanSelected -> Active(plan).
    ///
    /// Commits the plan, then submits the committed snapshot for broadcast.
    /// `credential` is forwarded in the event payload when present.
    pub async fn purchase(&self, selection: PlanSelection, credential: Option<String>) -> Result<Subscriber> {
        let subscriber = self
            .repository
            .update_plan(selection.subscriber_id, PlanAssignment::for_plan(selection.plan))
            .await?;

        info!(
            subscriber_id = subscriber.id,
            plan = %selection.plan,
            "Plan purchased"
        );

        match subscriber.snapshot(credential) {
            Some(snapshot) => match self.dispatcher.submit(snapshot) {
                SubmitOutcome::Accepted => {}
                outcome => warn!(
                    subscriber_id = subscriber.id,
                    outcome = ?outcome,
                    "Plan broadcast not queued"
                ),
            },
            None => error!(subscriber_id = subscriber.id, "Committed subscriber has no plan; broadcast skipped"),
        }

        Ok(subscriber)
    }

    /// Counts by account type and plan
    pub async fn statistics(&self) -> Result<PlanStatistics> {
        let mut stats = PlanStatistics::empty();
        for subscriber in self.repository.list_all().await? {
            stats.record(&subscriber);
        }
        Ok(stats)
    }
}
