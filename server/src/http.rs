use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{self, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use platform_authz::{
    AccessDecision, AuthzError, EntityId, EntityKind, EntityStore, Intent, StoreError,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, instrument};

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub config: Arc<AppConfig>,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "rbac server listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_methods([Method::POST, Method::GET])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/users", post(create_user_handler))
        .route("/users/{user_id}", get(get_user_handler))
        .route("/users/{user_id}/roles", post(assign_role_handler))
        .route("/roles", post(create_role_handler))
        .route("/roles/{role_id}", get(get_role_handler))
        .route("/roles/{role_id}/permissions", post(assign_permission_handler))
        .route("/permissions", post(create_permission_handler))
        .route("/permissions/{permission_id}", get(get_permission_handler))
        .route("/check_access", post(check_access_handler))
        .fallback(fallback_handler)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: String,
}

impl MessageBody {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateNamedRequest {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssignRoleRequest {
    role_id: Option<EntityId>,
}

#[derive(Debug, Deserialize)]
struct AssignPermissionRequest {
    permission_id: Option<EntityId>,
}

#[derive(Debug, Deserialize)]
struct CheckAccessRequest {
    username: Option<String>,
    input_text: Option<String>,
}

#[derive(Debug, Serialize)]
struct UserCreated {
    message: String,
    user_id: EntityId,
}

#[derive(Debug, Serialize)]
struct RoleCreated {
    message: String,
    role_id: EntityId,
}

#[derive(Debug, Serialize)]
struct PermissionCreated {
    message: String,
    permission_id: EntityId,
}

#[derive(Debug, Serialize)]
struct UserDetail {
    id: EntityId,
    username: String,
    roles: Vec<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct RoleDetail {
    id: EntityId,
    name: String,
    permissions: Vec<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct PermissionDetail {
    id: EntityId,
    name: String,
    created_at: DateTime<Utc>,
}

/// Wire shape of an access decision.
#[derive(Debug, Serialize)]
pub struct CheckAccessResponse {
    pub username: String,
    pub input_text: String,
    pub intent: Intent,
    pub required_permissions: Vec<String>,
    pub user_permissions: Vec<String>,
    pub has_access: bool,
}

impl CheckAccessResponse {
    pub fn new(username: String, input_text: String, decision: AccessDecision) -> Self {
        Self {
            username,
            input_text,
            intent: decision.intent,
            required_permissions: decision.required.into_iter().collect(),
            user_permissions: decision.held.into_iter().collect(),
            has_access: decision.granted,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    backend: &'static str,
    version: &'static str,
}

async fn root_handler() -> Json<MessageBody> {
    MessageBody::new("RBAC Application Running")
}

async fn fallback_handler() -> HttpError {
    HttpError::new(StatusCode::NOT_FOUND, "Not Found")
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.store.health_check().await.is_ok();
    Json(HealthResponse {
        ok: db_ok,
        db_ok,
        backend: state.store.backend_name(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[instrument(name = "http.create_user", skip_all)]
async fn create_user_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<UserCreated>)> {
    let Json(body) = payload?;
    let username = required(body.username, "Username is required")?;
    let user = state.store.create_user(&username).await?;
    info!(user_id = user.id, "user created");
    Ok((
        StatusCode::CREATED,
        Json(UserCreated {
            message: format!("User {} created", user.username),
            user_id: user.id,
        }),
    ))
}

#[instrument(name = "http.get_user", skip_all)]
async fn get_user_handler(
    State(state): State<AppState>,
    user_id: Result<Path<EntityId>, PathRejection>,
) -> HttpResult<Json<UserDetail>> {
    let user_id = path_id(user_id, EntityKind::User)?;
    let user = state
        .store
        .find_user(user_id)
        .await?
        .ok_or_else(|| HttpError::not_found(EntityKind::User))?;
    let roles = state
        .store
        .roles_of(user.id)
        .await?
        .into_iter()
        .map(|role| role.name)
        .collect();
    Ok(Json(UserDetail {
        id: user.id,
        username: user.username,
        roles,
        created_at: user.created_at,
    }))
}

#[instrument(name = "http.create_role", skip_all)]
async fn create_role_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateNamedRequest>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<RoleCreated>)> {
    let Json(body) = payload?;
    let name = required(body.name, "Role name is required")?;
    let role = state.store.create_role(&name).await?;
    info!(role_id = role.id, "role created");
    Ok((
        StatusCode::CREATED,
        Json(RoleCreated {
            message: format!("Role {} created", role.name),
            role_id: role.id,
        }),
    ))
}

#[instrument(name = "http.get_role", skip_all)]
async fn get_role_handler(
    State(state): State<AppState>,
    role_id: Result<Path<EntityId>, PathRejection>,
) -> HttpResult<Json<RoleDetail>> {
    let role_id = path_id(role_id, EntityKind::Role)?;
    let role = state
        .store
        .find_role(role_id)
        .await?
        .ok_or_else(|| HttpError::not_found(EntityKind::Role))?;
    let permissions = state
        .store
        .permissions_of(role.id)
        .await?
        .into_iter()
        .map(|permission| permission.name)
        .collect();
    Ok(Json(RoleDetail {
        id: role.id,
        name: role.name,
        permissions,
        created_at: role.created_at,
    }))
}

#[instrument(name = "http.create_permission", skip_all)]
async fn create_permission_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateNamedRequest>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<PermissionCreated>)> {
    let Json(body) = payload?;
    let name = required(body.name, "Permission name is required")?;
    let permission = state.store.create_permission(&name).await?;
    info!(permission_id = permission.id, "permission created");
    Ok((
        StatusCode::CREATED,
        Json(PermissionCreated {
            message: format!("Permission {} created", permission.name),
            permission_id: permission.id,
        }),
    ))
}

#[instrument(name = "http.get_permission", skip_all)]
async fn get_permission_handler(
    State(state): State<AppState>,
    permission_id: Result<Path<EntityId>, PathRejection>,
) -> HttpResult<Json<PermissionDetail>> {
    let permission_id = path_id(permission_id, EntityKind::Permission)?;
    let permission = state
        .store
        .find_permission(permission_id)
        .await?
        .ok_or_else(|| HttpError::not_found(EntityKind::Permission))?;
    Ok(Json(PermissionDetail {
        id: permission.id,
        name: permission.name,
        created_at: permission.created_at,
    }))
}

#[instrument(name = "http.assign_role", skip_all)]
async fn assign_role_handler(
    State(state): State<AppState>,
    user_id: Result<Path<EntityId>, PathRejection>,
    payload: Result<Json<AssignRoleRequest>, JsonRejection>,
) -> HttpResult<Json<MessageBody>> {
    let user_id = path_id(user_id, EntityKind::User)?;
    let Json(body) = payload?;
    let role_id = required_id(body.role_id, "role_id is required")?;
    let assignment = state
        .store
        .link_role_to_user(user_id, role_id)
        .await
        .map_err(|err| match err {
            StoreError::NotFound { .. } => {
                HttpError::new(StatusCode::NOT_FOUND, "User or Role not found")
            }
            other => other.into(),
        })?;
    info!(user_id, role_id, "role assigned");
    Ok(MessageBody::new(format!(
        "Role {} assigned to user {}",
        assignment.role.name, assignment.user.username
    )))
}

#[instrument(name = "http.assign_permission", skip_all)]
async fn assign_permission_handler(
    State(state): State<AppState>,
    role_id: Result<Path<EntityId>, PathRejection>,
    payload: Result<Json<AssignPermissionRequest>, JsonRejection>,
) -> HttpResult<Json<MessageBody>> {
    let role_id = path_id(role_id, EntityKind::Role)?;
    let Json(body) = payload?;
    let permission_id = required_id(body.permission_id, "permission_id is required")?;
    let grant = state
        .store
        .link_permission_to_role(role_id, permission_id)
        .await
        .map_err(|err| match err {
            StoreError::NotFound { .. } => {
                HttpError::new(StatusCode::NOT_FOUND, "Role or Permission not found")
            }
            other => other.into(),
        })?;
    info!(role_id, permission_id, "permission assigned");
    Ok(MessageBody::new(format!(
        "Permission {} assigned to role {}",
        grant.permission.name, grant.role.name
    )))
}

#[instrument(name = "http.check_access", skip_all)]
async fn check_access_handler(
    State(state): State<AppState>,
    payload: Result<Json<CheckAccessRequest>, JsonRejection>,
) -> HttpResult<Json<CheckAccessResponse>> {
    let Json(body) = payload?;
    let (Some(username), Some(input_text)) = (present(body.username), present(body.input_text))
    else {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            "Username and input_text are required",
        ));
    };
    let decision = platform_authz::check_access(state.store.as_ref(), &username, &input_text).await?;
    Ok(Json(CheckAccessResponse::new(username, input_text, decision)))
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, message: &str) -> HttpResult<String> {
    present(value).ok_or_else(|| HttpError::new(StatusCode::BAD_REQUEST, message))
}

/// Zero is treated as absent, like any other falsy id.
fn required_id(value: Option<EntityId>, message: &str) -> HttpResult<EntityId> {
    value
        .filter(|id| *id != 0)
        .ok_or_else(|| HttpError::new(StatusCode::BAD_REQUEST, message))
}

/// Non-numeric ids cannot name a row, so they read as "not found".
fn path_id(
    value: Result<Path<EntityId>, PathRejection>,
    kind: EntityKind,
) -> HttpResult<EntityId> {
    value
        .map(|Path(id)| id)
        .map_err(|_| HttpError::not_found(kind))
}

fn title(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::User => "User",
        EntityKind::Role => "Role",
        EntityKind::Permission => "Permission",
    }
}

type HttpResult<T> = Result<T, HttpError>;

#[derive(Debug)]
struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn new(status: StatusCode, msg: &str) -> Self {
        Self {
            status,
            message: msg.to_string(),
        }
    }

    fn not_found(kind: EntityKind) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("{} not found", title(kind)),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        error!(error = ?err, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".to_string(),
        }
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::MissingJsonContentType(_) => "Request must be JSON".to_string(),
            other => other.body_text(),
        };
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl From<StoreError> for HttpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmptyName { kind } => Self {
                status: StatusCode::BAD_REQUEST,
                message: format!("{} name is required", title(kind)),
            },
            StoreError::NotFound { kind, .. } => Self::not_found(kind),
            StoreError::AlreadyExists { kind, .. } => Self {
                status: StatusCode::BAD_REQUEST,
                message: format!("{} already exists", title(kind)),
            },
            StoreError::AlreadyLinked {
                owner,
                target,
                target_name,
                ..
            } => Self {
                status: StatusCode::BAD_REQUEST,
                message: format!("{} already has {} {}", title(owner), target, target_name),
            },
            StoreError::Backend(err) => Self::internal(err),
        }
    }
}

impl From<AuthzError> for HttpError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Validation(message) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
            },
            AuthzError::UserNotFound(_) => Self::not_found(EntityKind::User),
            AuthzError::IntentNotRecognized => {
                Self::new(StatusCode::BAD_REQUEST, "Intent not recognized")
            }
            AuthzError::Store(err) => err.into(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, MessageBody::new(self.message)).into_response()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        signal(SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
    info!("shutdown signal received");
}
