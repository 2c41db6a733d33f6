use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::anyhow;
use pasetors::{keys::SymmetricKey, version4::V4};
use rand::{rngs::OsRng, RngCore};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::{OnceCell, RwLock};

use strand_core::{UserId, Username};

use super::{
    hasher::{CredentialHasher, HasherConfig},
    lockout::{LockoutPolicy, LockoutState},
    mail::{LogMailSender, MailSender},
    rate_limit::{RateLimitSettings, RateLimiter},
};

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 1_048_576;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
pub const REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;
pub(crate) const REFRESH_TOKEN_SECRET_BYTES: usize = 48;
pub(crate) const VERIFICATION_TOKEN_BYTES: usize = 32;
pub(crate) const MAX_RETAINED_MESSAGES: usize = 1_000;
pub(crate) const METRICS_TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub(crate) static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) auth_failures: Mutex<HashMap<&'static str, u64>>,
    pub(crate) rate_limit_hits: Mutex<HashMap<(&'static str, &'static str), u64>>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub rate_limits: RateLimitSettings,
    pub lockout: LockoutPolicy,
    pub hasher: HasherConfig,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limits: RateLimitSettings::default(),
            lockout: LockoutPolicy::default(),
            hasher: HasherConfig::default(),
            database_url: None,
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) db_pool: Option<PgPool>,
    pub(crate) db_init: Arc<OnceCell<()>>,
    pub(crate) users: Arc<RwLock<HashMap<String, UserRecord>>>,
    pub(crate) user_ids: Arc<RwLock<HashMap<String, String>>>,
    pub(crate) sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
    pub(crate) messages: Arc<RwLock<Vec<MessageRecord>>>,
    pub(crate) token_key: Arc<SymmetricKey<V4>>,
    pub(crate) dummy_credential: Arc<(String, String)>,
    pub(crate) hasher: Arc<CredentialHasher>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) lockout: LockoutPolicy,
    pub(crate) mail: Arc<dyn MailSender>,
}

impl AppState {
    pub(crate) fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let mut key_bytes = [0_u8; 32];
        OsRng.fill_bytes(&mut key_bytes);
        let token_key = SymmetricKey::<V4>::from(&key_bytes)
            .map_err(|e| anyhow!("token key init failed: {e}"))?;

        let hasher = CredentialHasher::new(config.hasher);
        // Verified against for unknown identifiers so lookup misses cost the
        // same as a wrong password.
        let dummy_credential = hasher
            .hash("strand-dummy-password")
            .map_err(|e| anyhow!("dummy credential hash failed: {e:?}"))?;
        let limiter = RateLimiter::new(config.rate_limits);

        let db_pool = if let Some(database_url) = &config.database_url {
            Some(
                PgPoolOptions::new()
                    .max_connections(10)
                    .connect_lazy(database_url)
                    .map_err(|e| anyhow!("postgres pool init failed: {e}"))?,
            )
        } else {
            None
        };

        Ok(Self {
            db_pool,
            db_init: Arc::new(OnceCell::new()),
            users: Arc::new(RwLock::new(HashMap::new())),
            user_ids: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            messages: Arc::new(RwLock::new(Vec::new())),
            token_key: Arc::new(token_key),
            dummy_credential: Arc::new(dummy_credential),
            hasher: Arc::new(hasher),
            limiter: Arc::new(limiter),
            lockout: config.lockout,
            mail: Arc::new(LogMailSender),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_mail_sender(mut self, mail: Arc<dyn MailSender>) -> Self {
        self.mail = mail;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub(crate) id: UserId,
    pub(crate) username: Username,
    pub(crate) contact: String,
    pub(crate) password_hash: String,
    pub(crate) password_salt: String,
    pub(crate) active: bool,
    pub(crate) verified: bool,
    pub(crate) verification_token_hash: Option<String>,
    pub(crate) verification_token_salt: Option<String>,
    pub(crate) lockout: LockoutState,
    pub(crate) last_login_at_unix: Option<i64>,
    pub(crate) last_login_origin: Option<String>,
}

/// One session per identity, overwritten in place on every login and
/// refresh; the record identity never changes and at most one live
/// (hash, salt, expiry) triple exists per user.
#[derive(Debug, Clone)]
pub(crate) struct SessionRecord {
    pub(crate) user_id: UserId,
    pub(crate) refresh_token_hash: String,
    pub(crate) refresh_token_salt: String,
    pub(crate) refresh_token_expiry_unix: i64,
    pub(crate) is_online: bool,
    pub(crate) last_active_at_unix: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct MessageRecord {
    pub(crate) id: String,
    pub(crate) author_id: UserId,
    pub(crate) content: String,
    pub(crate) created_at_unix: i64,
}
