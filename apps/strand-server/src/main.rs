#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::str::FromStr;

use strand_server::{
    build_router, init_tracing, AppConfig, DigestAlgorithm, FixedWindowPolicy, HasherConfig,
    LockoutPolicy, RateLimitSettings, SlidingWindowPolicy,
};
use tokio::net::TcpListener;

fn env_parsed<T: FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {name} value {value:?}: {e}")),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let defaults = AppConfig::default();
    let rate_limits = RateLimitSettings {
        login: FixedWindowPolicy {
            permit_limit: env_parsed(
                "STRAND_LOGIN_PERMIT_LIMIT",
                defaults.rate_limits.login.permit_limit,
            )?,
            window_secs: env_parsed(
                "STRAND_LOGIN_WINDOW_SECS",
                defaults.rate_limits.login.window_secs,
            )?,
        },
        refresh_token: FixedWindowPolicy {
            permit_limit: env_parsed(
                "STRAND_REFRESH_PERMIT_LIMIT",
                defaults.rate_limits.refresh_token.permit_limit,
            )?,
            window_secs: env_parsed(
                "STRAND_REFRESH_WINDOW_SECS",
                defaults.rate_limits.refresh_token.window_secs,
            )?,
        },
        registration: FixedWindowPolicy {
            permit_limit: env_parsed(
                "STRAND_REGISTRATION_PERMIT_LIMIT",
                defaults.rate_limits.registration.permit_limit,
            )?,
            window_secs: env_parsed(
                "STRAND_REGISTRATION_WINDOW_SECS",
                defaults.rate_limits.registration.window_secs,
            )?,
        },
        global: SlidingWindowPolicy {
            permit_limit: env_parsed(
                "STRAND_GLOBAL_PERMIT_LIMIT",
                defaults.rate_limits.global.permit_limit,
            )?,
            window_secs: env_parsed(
                "STRAND_GLOBAL_WINDOW_SECS",
                defaults.rate_limits.global.window_secs,
            )?,
            segments_per_window: env_parsed(
                "STRAND_GLOBAL_SEGMENTS",
                defaults.rate_limits.global.segments_per_window,
            )?,
        },
    };
    let lockout = LockoutPolicy {
        max_attempts: env_parsed("STRAND_LOCKOUT_MAX_ATTEMPTS", defaults.lockout.max_attempts)?,
        lockout_duration_secs: env_parsed(
            "STRAND_LOCKOUT_DURATION_SECS",
            defaults.lockout.lockout_duration_secs,
        )?,
    };
    let algorithm = std::env::var("STRAND_HASH_ALGORITHM")
        .ok()
        .map_or(defaults.hasher.algorithm, |value| {
            DigestAlgorithm::try_from(value.as_str()).unwrap_or_else(|()| {
                tracing::error!(
                    event = "hasher.config_invalid",
                    field = "algorithm",
                    configured = %value,
                    "unsupported digest algorithm, using sha256"
                );
                defaults.hasher.algorithm
            })
        });
    let hasher = HasherConfig {
        salt_len_bytes: env_parsed("STRAND_HASH_SALT_BYTES", defaults.hasher.salt_len_bytes)?,
        iterations: env_parsed("STRAND_HASH_ITERATIONS", defaults.hasher.iterations)?,
        algorithm,
    };

    let app_config = AppConfig {
        rate_limits,
        lockout,
        hasher,
        database_url: std::env::var("STRAND_DATABASE_URL").ok(),
        ..AppConfig::default()
    };
    let app = build_router(&app_config)?;
    let addr = std::env::var("STRAND_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid STRAND_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "strand-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
