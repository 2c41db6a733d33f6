use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Request, State},
    http::{HeaderName, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    auth::{now_unix_millis, request_subject},
    core::{AppConfig, AppState},
    errors::AuthFailure,
    handlers::{
        auth::{login, logout, me, refresh, register, verify_contact},
        messages::{create_message, list_messages},
    },
    partition::{resolve_partition_key, PartitionKey},
    rate_limit::{Decision, PolicyName, RoutePolicy},
    types::{health, metrics},
};

/// Build the axum router with global security middleware.
///
/// # Errors
/// Returns an error if application state fails to initialize.
pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    let app_state = AppState::new(config)?;
    Ok(router_with_state(app_state, config))
}

/// Routes carrying a named policy get their own admission layer at
/// registration time; everything else is throttled by the global
/// sliding-window policy. A named route is never also counted globally.
pub(crate) fn router_with_state(app_state: AppState, config: &AppConfig) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");
    let throttled = |policy: PolicyName| {
        middleware::from_fn_with_state(
            (app_state.clone(), RoutePolicy::Named(policy)),
            admission,
        )
    };

    let named_routes = Router::new()
        .route(
            "/auth/register",
            post(register).layer(throttled(PolicyName::Registration)),
        )
        .route(
            "/auth/verify",
            post(verify_contact).layer(throttled(PolicyName::Registration)),
        )
        .route("/auth/login", post(login).layer(throttled(PolicyName::Login)))
        .route(
            "/auth/refresh",
            post(refresh).layer(throttled(PolicyName::RefreshToken)),
        );

    let global_routes = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/messages", post(create_message).get(list_messages))
        .layer(middleware::from_fn_with_state(
            (app_state.clone(), RoutePolicy::Global),
            admission,
        ));

    named_routes
        .merge(global_routes)
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
                .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                )),
        )
}

/// Admission control for one route. Runs before the handler, resolves the
/// throttling partition, and converts a limiter rejection into the 429
/// response with retry guidance. Partition-resolution failures admit the
/// request: availability over strict enforcement for this control plane.
async fn admission(
    State((state, route)): State<(AppState, RoutePolicy)>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|value| value.0)
        .or_else(|| request.extensions().get::<SocketAddr>().copied());
    let subject = request_subject(&state, request.headers());
    let partition = match resolve_partition_key(subject.as_deref(), request.headers(), peer) {
        Ok(partition) => partition,
        Err(error) => {
            tracing::warn!(
                event = "rate_limit.partition_unresolved",
                error = ?error,
                endpoint = %request.uri().path(),
                "partition resolution failed, admitting request"
            );
            PartitionKey::unrestricted()
        }
    };

    match state.limiter.try_acquire(&partition, route, now_unix_millis()) {
        Decision::Admitted => {
            request.extensions_mut().insert(partition);
            next.run(request).await
        }
        Decision::Rejected(rejection) => {
            tracing::warn!(
                event = "rate_limit.rejected",
                policy = rejection.policy,
                algorithm = rejection.algorithm,
                endpoint = %request.uri().path(),
                partition = %partition.as_str(),
                partition_source = partition.source().as_str(),
                permit_limit = rejection.permit_limit,
                window_secs = rejection.window_secs,
                retry_after_secs = rejection.retry_after_secs,
                "admission denied"
            );
            AuthFailure::RateLimited {
                policy: rejection.policy,
                retry_after_secs: rejection.retry_after_secs,
            }
            .into_response()
        }
    }
}
