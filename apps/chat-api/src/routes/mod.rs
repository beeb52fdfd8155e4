pub mod groups;
pub mod health;
pub mod messages;
pub mod push;
pub mod users;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .merge(users::router())
        .merge(messages::router())
        .merge(groups::router())
        .merge(push::router())
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        health::service_info,
        // Users
        users::me,
        users::list_users,
        users::online_users,
        // Messages
        messages::list_messages,
        messages::list_private_messages,
        // Groups
        groups::list_groups,
        groups::create_group,
        groups::list_members,
        groups::list_group_messages,
        groups::add_member,
        groups::leave_group,
        // Push
        push::subscribe,
        push::unsubscribe,
        push::vapid_public_key,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Models
            crate::models::user::User,
            crate::models::group::GroupChat,
            crate::models::group::GroupSummary,
            crate::models::group::GroupMember,
            crate::models::group::MemberRole,
            // Route request/response types
            health::HealthResponse,
            health::ServiceInfo,
            users::UserEntry,
            users::OnlineUsersResponse,
            messages::HistoryMessage,
            groups::CreateGroupRequest,
            groups::MessageResponse,
            push::SubscribeRequest,
            push::SubscriptionKeys,
            push::UnsubscribeRequest,
            push::VapidKeyResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Users", description = "Users and presence"),
        (name = "Messages", description = "Message history"),
        (name = "Groups", description = "Group chats"),
        (name = "Push", description = "Web push subscriptions"),
    )
)]
pub struct ApiDoc;
