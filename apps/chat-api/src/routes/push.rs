//! Web push subscription endpoints.

use axum::extract::State;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::CurrentUser;
use crate::error::{ApiError, FieldError};
use crate::models::push_subscription::NewPushSubscription;
use crate::AppState;

use super::groups::MessageResponse;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/subscribe", post(subscribe))
        .route("/api/unsubscribe", delete(unsubscribe))
        .route("/api/vapid-public-key", get(vapid_public_key))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// The browser's `PushSubscription.toJSON()` output.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VapidKeyResponse {
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

fn validate_subscription(body: &SubscribeRequest) -> Result<(), ApiError> {
    let mut errors = Vec::new();
    if !body.endpoint.starts_with("https://") {
        errors.push(FieldError {
            field: "endpoint".to_string(),
            message: "Endpoint must be an https URL".to_string(),
        });
    }
    if body.keys.p256dh.trim().is_empty() {
        errors.push(FieldError {
            field: "keys.p256dh".to_string(),
            message: "p256dh key is required".to_string(),
        });
    }
    if body.keys.auth.trim().is_empty() {
        errors.push(FieldError {
            field: "keys.auth".to_string(),
            message: "auth secret is required".to_string(),
        });
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation(errors))
    }
}

#[utoipa::path(
    post,
    path = "/api/subscribe",
    tag = "Push",
    security(("bearer" = [])),
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Subscription stored", body = MessageResponse),
        (status = 400, description = "Validation error", body = crate::error::ApiErrorBody),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn subscribe(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(body): Json<SubscribeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_subscription(&body)?;

    state
        .store
        .upsert_push_target(NewPushSubscription {
            user_id: user.id,
            endpoint: &body.endpoint,
            p256dh: &body.keys.p256dh,
            auth: &body.keys.auth,
        })
        .await?;

    tracing::info!(username = %user.username, endpoint = %body.endpoint, "push subscription stored");

    Ok(Json(MessageResponse {
        message: "Subscribed to push notifications".to_string(),
    }))
}

#[utoipa::path(
    delete,
    path = "/api/unsubscribe",
    tag = "Push",
    security(("bearer" = [])),
    request_body = UnsubscribeRequest,
    responses(
        (status = 200, description = "Subscription removed (or was absent)", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn unsubscribe(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(body): Json<UnsubscribeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let removed = state
        .store
        .delete_user_push_target(user.id, &body.endpoint)
        .await?;
    tracing::debug!(username = %user.username, removed, "push unsubscribe");

    Ok(Json(MessageResponse {
        message: "Unsubscribed from push notifications".to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/vapid-public-key",
    tag = "Push",
    responses(
        (status = 200, description = "Key for PushManager.subscribe", body = VapidKeyResponse),
        (status = 404, description = "Push is not configured", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn vapid_public_key(
    State(state): State<AppState>,
) -> Result<Json<VapidKeyResponse>, ApiError> {
    let public_key = state
        .config
        .push
        .vapid_public_key
        .clone()
        .ok_or_else(|| ApiError::not_found("Push notifications are not configured"))?;
    Ok(Json(VapidKeyResponse { public_key }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(endpoint: &str, p256dh: &str, auth: &str) -> SubscribeRequest {
        SubscribeRequest {
            endpoint: endpoint.to_string(),
            keys: SubscriptionKeys {
                p256dh: p256dh.to_string(),
                auth: auth.to_string(),
            },
        }
    }

    #[test]
    fn subscription_requires_https_endpoint_and_keys() {
        assert!(validate_subscription(&request("https://push.example/x", "p", "a")).is_ok());
        let err = validate_subscription(&request("http://push.example/x", "", "a")).unwrap_err();
        let fields: Vec<_> = err.details.unwrap().into_iter().map(|f| f.field).collect();
        assert_eq!(fields, vec!["endpoint", "keys.p256dh"]);
    }
}
