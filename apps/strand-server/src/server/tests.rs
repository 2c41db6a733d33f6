use std::sync::Arc;

use axum::{body::Body, http::Request, http::StatusCode, response::Response, Router};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::{
    core::{AppConfig, AppState},
    hasher::{DigestAlgorithm, HasherConfig},
    lockout::LockoutPolicy,
    mail::CapturingMailSender,
    rate_limit::{FixedWindowPolicy, RateLimitSettings, SlidingWindowPolicy},
    router::router_with_state,
    types::{AuthResponse, MessageListResponse},
};

fn test_config() -> AppConfig {
    AppConfig {
        hasher: HasherConfig {
            salt_len_bytes: 16,
            iterations: 10_000,
            algorithm: DigestAlgorithm::Sha256,
        },
        rate_limits: RateLimitSettings {
            login: FixedWindowPolicy {
                permit_limit: 100,
                window_secs: 900,
            },
            refresh_token: FixedWindowPolicy {
                permit_limit: 100,
                window_secs: 600,
            },
            registration: FixedWindowPolicy {
                permit_limit: 100,
                window_secs: 3600,
            },
            global: SlidingWindowPolicy {
                permit_limit: 1000,
                window_secs: 60,
                segments_per_window: 6,
            },
        },
        ..AppConfig::default()
    }
}

fn test_app(config: &AppConfig) -> (Router, Arc<CapturingMailSender>) {
    let mail = Arc::new(CapturingMailSender::new());
    let state = AppState::new(config)
        .expect("state should initialize")
        .with_mail_sender(mail.clone());
    (router_with_state(state, config), mail)
}

async fn send_json(app: &Router, method: &str, uri: &str, ip: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn send_get(app: &Router, uri: &str, ip: &str, bearer: Option<&str>) -> Response {
    let mut builder = Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-forwarded-for", ip);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = builder.body(Body::empty()).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn response_body(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn captured_verification_token(mail: &CapturingMailSender, contact: &str) -> String {
    let messages = mail
        .messages
        .lock()
        .expect("capturing mail mutex should not be poisoned");
    let message = messages
        .iter()
        .rev()
        .find(|message| message.to_contact == contact)
        .expect("verification mail should have been handed off");
    let payload: Value = serde_json::from_str(&message.payload_json).unwrap();
    payload["token"].as_str().expect("token in payload").to_owned()
}

async fn register_and_verify(
    app: &Router,
    mail: &CapturingMailSender,
    username: &str,
    password: &str,
    ip: &str,
) {
    let contact = format!("{username}@example.com");
    let register = send_json(
        app,
        "POST",
        "/auth/register",
        ip,
        json!({"username": username, "password": password, "contact": contact}),
    )
    .await;
    assert_eq!(register.status(), StatusCode::OK);

    let token = captured_verification_token(mail, &contact);
    let verify = send_json(
        app,
        "POST",
        "/auth/verify",
        ip,
        json!({"username": username, "token": token}),
    )
    .await;
    assert_eq!(verify.status(), StatusCode::OK);
}

async fn login(app: &Router, username: &str, password: &str, ip: &str) -> Response {
    send_json(
        app,
        "POST",
        "/auth/login",
        ip,
        json!({"username": username, "password": password}),
    )
    .await
}

#[tokio::test]
async fn auth_flow_register_verify_login_me_refresh_rotation_and_logout() {
    let config = test_config();
    let (app, mail) = test_app(&config);
    let ip = "203.0.113.10";

    let register = send_json(
        &app,
        "POST",
        "/auth/register",
        ip,
        json!({"username":"alice_1","password":"super-secure-password","contact":"alice_1@example.com"}),
    )
    .await;
    assert_eq!(register.status(), StatusCode::OK);

    // Unverified accounts cannot log in yet.
    let early_login = login(&app, "alice_1", "super-secure-password", ip).await;
    assert_eq!(early_login.status(), StatusCode::FORBIDDEN);

    let bad_verify = send_json(
        &app,
        "POST",
        "/auth/verify",
        ip,
        json!({"username":"alice_1","token":"not-the-real-token"}),
    )
    .await;
    assert_eq!(bad_verify.status(), StatusCode::UNAUTHORIZED);

    let token = captured_verification_token(&mail, "alice_1@example.com");
    let verify = send_json(
        &app,
        "POST",
        "/auth/verify",
        ip,
        json!({"username":"alice_1","token":token}),
    )
    .await;
    assert_eq!(verify.status(), StatusCode::OK);

    let login_response = login(&app, "alice_1", "super-secure-password", ip).await;
    assert_eq!(login_response.status(), StatusCode::OK);
    let issued: AuthResponse =
        serde_json::from_slice(&response_body(login_response).await).unwrap();

    let me = send_get(&app, "/auth/me", ip, Some(&issued.access_token)).await;
    assert_eq!(me.status(), StatusCode::OK);
    let me_body: Value = serde_json::from_slice(&response_body(me).await).unwrap();
    assert_eq!(me_body["username"], "alice_1");

    let refresh = send_json(
        &app,
        "POST",
        "/auth/refresh",
        ip,
        json!({"refresh_token": issued.refresh_token}),
    )
    .await;
    assert_eq!(refresh.status(), StatusCode::OK);
    let rotated: AuthResponse = serde_json::from_slice(&response_body(refresh).await).unwrap();

    // The rotated-away token is spent.
    let replay = send_json(
        &app,
        "POST",
        "/auth/refresh",
        ip,
        json!({"refresh_token": issued.refresh_token}),
    )
    .await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

    // The current token still rotates exactly once more.
    let second_refresh = send_json(
        &app,
        "POST",
        "/auth/refresh",
        ip,
        json!({"refresh_token": rotated.refresh_token}),
    )
    .await;
    assert_eq!(second_refresh.status(), StatusCode::OK);
    let current: AuthResponse =
        serde_json::from_slice(&response_body(second_refresh).await).unwrap();

    let logout = send_json(
        &app,
        "POST",
        "/auth/logout",
        ip,
        json!({"refresh_token": current.refresh_token}),
    )
    .await;
    assert_eq!(logout.status(), StatusCode::NO_CONTENT);

    let refresh_after_logout = send_json(
        &app,
        "POST",
        "/auth/refresh",
        ip,
        json!({"refresh_token": current.refresh_token}),
    )
    .await;
    assert_eq!(refresh_after_logout.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_errors_do_not_enumerate_accounts() {
    let config = test_config();
    let (app, mail) = test_app(&config);
    let ip = "203.0.113.11";
    register_and_verify(&app, &mail, "real_user", "super-secure-password", ip).await;

    let unknown_user = login(&app, "does_not_exist", "super-secure-password", ip).await;
    assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);
    let unknown_user_body = response_body(unknown_user).await;

    let wrong_password = login(&app, "real_user", "not-the-right-password", ip).await;
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    let wrong_password_body = response_body(wrong_password).await;

    assert_eq!(unknown_user_body, wrong_password_body);
}

#[tokio::test]
async fn lockout_rejects_the_correct_password_after_max_failures() {
    let config = AppConfig {
        lockout: LockoutPolicy {
            max_attempts: 3,
            lockout_duration_secs: 900,
        },
        ..test_config()
    };
    let (app, mail) = test_app(&config);
    let ip = "203.0.113.12";
    register_and_verify(&app, &mail, "bob_locked", "super-secure-password", ip).await;

    for _ in 0..3 {
        let failed = login(&app, "bob_locked", "wrong-password-value", ip).await;
        assert_eq!(failed.status(), StatusCode::UNAUTHORIZED);
        let body: Value = serde_json::from_slice(&response_body(failed).await).unwrap();
        assert_eq!(body["error"], "invalid_credentials");
    }

    // Correct password while locked is still rejected, with the lock's own
    // message now that the caller has proven knowledge of the identifier.
    let locked = login(&app, "bob_locked", "super-secure-password", ip).await;
    assert_eq!(locked.status(), StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(&response_body(locked).await).unwrap();
    assert_eq!(body["error"], "account_locked");
}

#[tokio::test]
async fn login_rate_limit_rejects_past_the_permit_limit_with_retry_guidance() {
    let config = AppConfig {
        rate_limits: RateLimitSettings {
            login: FixedWindowPolicy {
                permit_limit: 2,
                window_secs: 900,
            },
            ..test_config().rate_limits
        },
        ..test_config()
    };
    let (app, _mail) = test_app(&config);
    let ip = "203.0.113.13";

    for _ in 0..2 {
        let attempt = login(&app, "nobody_here", "some-long-password", ip).await;
        assert_eq!(attempt.status(), StatusCode::UNAUTHORIZED);
    }

    let limited = login(&app, "nobody_here", "some-long-password", ip).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = limited
        .headers()
        .get("retry-after")
        .expect("retry-after header should be set")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=900).contains(&retry_after));
    let body: Value = serde_json::from_slice(&response_body(limited).await).unwrap();
    assert_eq!(body["error"], "rate_limited");

    // A different partition is unaffected.
    let other = login(&app, "nobody_here", "some-long-password", "203.0.113.14").await;
    assert_eq!(other.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn named_policy_routes_bypass_the_global_limiter() {
    let config = AppConfig {
        rate_limits: RateLimitSettings {
            global: SlidingWindowPolicy {
                permit_limit: 2,
                window_secs: 60,
                segments_per_window: 6,
            },
            ..test_config().rate_limits
        },
        ..test_config()
    };
    let (app, _mail) = test_app(&config);
    let ip = "203.0.113.15";

    // Login is independently throttled; none of these count globally.
    for _ in 0..5 {
        let attempt = login(&app, "nobody_here", "some-long-password", ip).await;
        assert_eq!(attempt.status(), StatusCode::UNAUTHORIZED);
    }

    for _ in 0..2 {
        let health = send_get(&app, "/health", ip, None).await;
        assert_eq!(health.status(), StatusCode::OK);
    }
    let limited = send_get(&app, "/health", ip, None).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn invalid_limiter_configuration_fails_open() {
    let config = AppConfig {
        rate_limits: RateLimitSettings {
            login: FixedWindowPolicy {
                permit_limit: 0,
                window_secs: 900,
            },
            ..test_config().rate_limits
        },
        ..test_config()
    };
    let (app, _mail) = test_app(&config);
    let ip = "203.0.113.16";

    for _ in 0..10 {
        let attempt = login(&app, "nobody_here", "some-long-password", ip).await;
        assert_eq!(attempt.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn messages_route_requires_a_bearer_token_and_round_trips() {
    let config = test_config();
    let (app, mail) = test_app(&config);
    let ip = "203.0.113.17";
    register_and_verify(&app, &mail, "chatty_user", "super-secure-password", ip).await;
    let login_response = login(&app, "chatty_user", "super-secure-password", ip).await;
    let issued: AuthResponse =
        serde_json::from_slice(&response_body(login_response).await).unwrap();

    let unauthenticated = send_json(
        &app,
        "POST",
        "/messages",
        ip,
        json!({"content":"hello there"}),
    )
    .await;
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

    let create = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/messages")
                .header("content-type", "application/json")
                .header("x-forwarded-for", ip)
                .header("authorization", format!("Bearer {}", issued.access_token))
                .body(Body::from(json!({"content":"hello there"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create.status(), StatusCode::OK);

    let list = send_get(&app, "/messages", ip, Some(&issued.access_token)).await;
    assert_eq!(list.status(), StatusCode::OK);
    let listed: MessageListResponse = serde_json::from_slice(&response_body(list).await).unwrap();
    assert!(listed
        .messages
        .iter()
        .any(|message| message.content == "hello there"));
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let config = test_config();
    let (app, _mail) = test_app(&config);

    let metrics = send_get(&app, "/metrics", "203.0.113.18", None).await;
    assert_eq!(metrics.status(), StatusCode::OK);
    let body = String::from_utf8(response_body(metrics).await).unwrap();
    assert!(body.contains("# TYPE strand_auth_failures_total counter"));
}
