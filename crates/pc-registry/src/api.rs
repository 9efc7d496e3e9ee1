//! Subscribers API
//!
//! JSON endpoints over `SubscriptionService`. The subscriber id travels in
//! the path; responses never include the credential hash. The subscriber
//! list and statistics are owner-only.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use pc_common::{AccountType, Subscriber, SubscriptionPlan};
use pc_relay::{AsyncDispatcher, ConnectionManager, ConnectionState, ConnectionStatus, DispatcherStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{RegistryError, Result};
use crate::owner::{OwnerAccess, OwnerCredentials};
use crate::service::{PlanState, PlanStatistics, SubscriptionService};
use crate::validation::RegistrationForm;

/// Subscriber as returned by the API
#[derive(Debug, Serialize)]
pub struct SubscriberResponse {
    pub id: i64,
    pub account_type: AccountType,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub email: String,
    pub telephone: String,
    pub address: String,
    pub organization_name: Option<String>,
    pub subscription_type: Option<SubscriptionPlan>,
    pub max_users: Option<i64>,
    pub max_resources: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<Subscriber> for SubscriberResponse {
    fn from(s: Subscriber) -> Self {
        Self {
            id: s.id,
            account_type: s.account_type,
            name: s.display_name(),
            first_name: s.first_name,
            last_name: s.last_name,
            email: s.email,
            telephone: s.telephone,
            address: s.address,
            organization_name: s.organization_name,
            subscription_type: s.plan.map(|p| p.subscription_type),
            max_users: s.plan.map(|p| p.max_users),
            max_resources: s.plan.map(|p| p.max_resources),
            created_at: s.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriberDetailResponse {
    #[serde(flatten)]
    pub subscriber: SubscriberResponse,
    pub plan_state: PlanState,
}

#[derive(Debug, Serialize)]
pub struct SubscriberListResponse {
    pub subscribers: Vec<SubscriberResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct PlanOption {
    pub plan: SubscriptionPlan,
    pub max_users: i64,
    pub max_resources: i64,
}

#[derive(Debug, Serialize)]
pub struct AvailablePlansResponse {
    pub subscriber_id: i64,
    pub plans: Vec<PlanOption>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct PurchaseRequest {
    pub plan: String,
    /// Verified against the stored hash and forwarded in the broadcast when given
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub event_channel: ConnectionStatus,
    pub dispatcher: DispatcherStats,
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<SubscriptionService>,
    pub connection: Arc<ConnectionManager>,
    pub dispatcher: AsyncDispatcher,
    pub owner: OwnerCredentials,
}

async fn register(
    State(state): State<AppState>,
    Json(form): Json<RegistrationForm>,
) -> Result<(StatusCode, Json<SubscriberResponse>)> {
    let subscriber = state.subscriptions.register(form).await?;
    Ok((StatusCode::CREATED, Json(subscriber.into())))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SubscriberResponse>> {
    let subscriber = state.subscriptions.authenticate(&req.email, &req.password).await?;
    Ok(Json(subscriber.into()))
}

async fn list_subscribers(
    _owner: OwnerAccess,
    State(state): State<AppState>,
) -> Result<Json<SubscriberListResponse>> {
    let subscribers: Vec<SubscriberResponse> = state
        .subscriptions
        .list_all()
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(SubscriberListResponse {
        total: subscribers.len(),
        subscribers,
    }))
}

async fn get_subscriber(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SubscriberDetailResponse>> {
    let subscriber = state.subscriptions.get(id).await?;
    let plan_state = PlanState::of(&subscriber);

    Ok(Json(SubscriberDetailResponse {
        subscriber: subscriber.into(),
        plan_state,
    }))
}

async fn available_plans(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<AvailablePlansResponse>> {
    let plans = state
        .subscriptions
        .available_plans(id)
        .await?
        .iter()
        .map(|plan| {
            let limits = plan.limits();
            PlanOption {
                plan: *plan,
                max_users: limits.max_users,
                max_resources: limits.max_resources,
            }
        })
        .collect();

    Ok(Json(AvailablePlansResponse {
        subscriber_id: id,
        plans,
    }))
}

async fn purchase(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<SubscriberDetailResponse>> {
    let plan: SubscriptionPlan = req
        .plan
        .trim()
        .parse()
        .map_err(|_| RegistryError::validation("Unknown plan."))?;

    if let Some(password) = req.password.as_deref() {
        let subscriber = state.subscriptions.get(id).await?;
        state.subscriptions.authenticate(&subscriber.email, password).await?;
    }

    let selection = state.subscriptions.select_plan(id, plan).await?;
    let subscriber = state.subscriptions.purchase(selection, req.password).await?;
    let plan_state = PlanState::of(&subscriber);

    Ok(Json(SubscriberDetailResponse {
        subscriber: subscriber.into(),
        plan_state,
    }))
}

async fn statistics(_owner: OwnerAccess, State(state): State<AppState>) -> Result<Json<PlanStatistics>> {
    Ok(Json(state.subscriptions.statistics().await?))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let event_channel = state.connection.status();
    let status = if event_channel.state == ConnectionState::Connected {
        "UP"
    } else {
        "DEGRADED"
    };

    Json(HealthResponse {
        status,
        timestamp: Utc::now(),
        event_channel,
        dispatcher: state.dispatcher.stats(),
    })
}

/// Create the subscribers router
pub fn subscribers_router(state: AppState) -> Router {
    Router::new()
        .route("/api/subscribers", post(register).get(list_subscribers))
        .route("/api/subscribers/login", post(login))
        .route("/api/subscribers/{id}", get(get_subscriber))
        .route("/api/subscribers/{id}/plans", get(available_plans))
        .route("/api/subscribers/{id}/purchase", post(purchase))
        .route("/api/stats", get(statistics))
        .route("/health", get(health))
        .with_state(state)
}
