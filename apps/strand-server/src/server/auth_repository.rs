use sqlx::{PgPool, Row};

use strand_core::{UserId, Username};

use super::{
    core::{AppState, SessionRecord, UserRecord, REFRESH_TOKEN_TTL_SECS},
    errors::AuthFailure,
    lockout::{LockoutGate, LockoutState},
};

/// Persistence contract for the authentication flows. One commit per
/// successful state transition; the lockout fields have no other writer.
pub(crate) trait AuthPersistence {
    /// Returns the new user's id, or `None` when the username is taken.
    async fn create_user_if_missing(
        &self,
        username: &Username,
        contact: &str,
        password_hash: &str,
        password_salt: &str,
        verification_token_hash: &str,
        verification_token_salt: &str,
    ) -> Result<Option<UserId>, AuthFailure>;

    /// Consumes a single-use contact-verification token.
    async fn verify_contact(&self, username: &Username, token: &str) -> Result<(), AuthFailure>;

    /// Runs the full authentication transition table for one attempt:
    /// identity lookup, inactive/unverified checks, lock gate with lazy
    /// auto-unlock, credential verification, counter mutation or reset.
    async fn authenticate(
        &self,
        username: &Username,
        password: &str,
        origin: &str,
        now_unix: i64,
    ) -> Result<UserId, AuthFailure>;

    /// Creates the user's session on first login, overwrites it in place on
    /// every later login.
    async fn upsert_session(
        &self,
        user_id: UserId,
        refresh_token_hash: &str,
        refresh_token_salt: &str,
        expiry_unix: i64,
        now_unix: i64,
    ) -> Result<(), AuthFailure>;

    /// Verifies the presented token against the current stored (hash, salt)
    /// and atomically replaces it. At most one presentation of a given token
    /// value can ever succeed; the loser of a race observes the overwritten
    /// hash and fails.
    async fn rotate_refresh_token(
        &self,
        user_id: UserId,
        presented_token: &str,
        next_hash: &str,
        next_salt: &str,
        next_expiry_unix: i64,
        now_unix: i64,
    ) -> Result<(), AuthFailure>;

    /// Ends the session the presented token belongs to.
    async fn close_session(
        &self,
        user_id: UserId,
        presented_token: &str,
        now_unix: i64,
    ) -> Result<(), AuthFailure>;

    async fn find_username_by_id(&self, user_id: UserId) -> Option<String>;
}

pub(crate) fn refresh_session_expiry_unix(now_unix: i64) -> i64 {
    now_unix + REFRESH_TOKEN_TTL_SECS
}

pub(crate) struct PostgresAuthRepository<'a> {
    state: &'a AppState,
    pool: &'a PgPool,
}

impl<'a> PostgresAuthRepository<'a> {
    pub(crate) fn new(state: &'a AppState, pool: &'a PgPool) -> Self {
        Self { state, pool }
    }

    async fn ensure_schema(&self) -> Result<(), AuthFailure> {
        const SCHEMA_INIT_LOCK_ID: i64 = 0x5354_5241_4e44;
        let pool = self.pool;
        self.state
            .db_init
            .get_or_try_init(|| async move {
                let mut tx = pool.begin().await?;
                sqlx::query("SELECT pg_advisory_xact_lock($1)")
                    .bind(SCHEMA_INIT_LOCK_ID)
                    .execute(&mut *tx)
                    .await?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS users (
                        user_id TEXT PRIMARY KEY,
                        username TEXT UNIQUE NOT NULL,
                        contact TEXT NOT NULL,
                        password_hash TEXT NOT NULL,
                        password_salt TEXT NOT NULL,
                        active BOOLEAN NOT NULL DEFAULT TRUE,
                        verified BOOLEAN NOT NULL DEFAULT FALSE,
                        verification_token_hash TEXT NULL,
                        verification_token_salt TEXT NULL,
                        failed_attempts INTEGER NOT NULL DEFAULT 0,
                        last_failed_at_unix BIGINT NULL,
                        is_locked BOOLEAN NOT NULL DEFAULT FALSE,
                        locked_until_unix BIGINT NULL,
                        last_login_at_unix BIGINT NULL,
                        last_login_origin TEXT NULL
                    )",
                )
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS sessions (
                        user_id TEXT PRIMARY KEY REFERENCES users(user_id) ON DELETE CASCADE,
                        refresh_token_hash TEXT NOT NULL,
                        refresh_token_salt TEXT NOT NULL,
                        refresh_token_expiry_unix BIGINT NOT NULL,
                        is_online BOOLEAN NOT NULL DEFAULT FALSE,
                        last_active_at_unix BIGINT NOT NULL
                    )",
                )
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    fn row_lockout_state(row: &sqlx::postgres::PgRow) -> Result<LockoutState, AuthFailure> {
        let failed_attempts: i32 = row
            .try_get("failed_attempts")
            .map_err(|_| AuthFailure::Internal)?;
        let last_failed_at_unix: Option<i64> = row
            .try_get("last_failed_at_unix")
            .map_err(|_| AuthFailure::Internal)?;
        let is_locked: bool = row.try_get("is_locked").map_err(|_| AuthFailure::Internal)?;
        let locked_until_unix: Option<i64> = row
            .try_get("locked_until_unix")
            .map_err(|_| AuthFailure::Internal)?;
        Ok(LockoutState {
            failed_attempts: u32::try_from(failed_attempts).unwrap_or(0),
            last_failed_at_unix,
            is_locked,
            locked_until_unix,
        })
    }

    async fn persist_lockout(
        &self,
        user_id: &str,
        lockout: LockoutState,
    ) -> Result<(), AuthFailure> {
        sqlx::query(
            "UPDATE users
             SET failed_attempts = $2, last_failed_at_unix = $3,
                 is_locked = $4, locked_until_unix = $5
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(i32::try_from(lockout.failed_attempts).unwrap_or(i32::MAX))
        .bind(lockout.last_failed_at_unix)
        .bind(lockout.is_locked)
        .bind(lockout.locked_until_unix)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }
}

impl AuthPersistence for PostgresAuthRepository<'_> {
    async fn create_user_if_missing(
        &self,
        username: &Username,
        contact: &str,
        password_hash: &str,
        password_salt: &str,
        verification_token_hash: &str,
        verification_token_salt: &str,
    ) -> Result<Option<UserId>, AuthFailure> {
        self.ensure_schema().await?;
        let user_id = UserId::new();
        let insert_result = sqlx::query(
            "INSERT INTO users (user_id, username, contact, password_hash, password_salt,
                                active, verified, verification_token_hash, verification_token_salt,
                                failed_attempts, is_locked)
             VALUES ($1, $2, $3, $4, $5, TRUE, FALSE, $6, $7, 0, FALSE)
             ON CONFLICT (username) DO NOTHING",
        )
        .bind(user_id.to_string())
        .bind(username.as_str())
        .bind(contact)
        .bind(password_hash)
        .bind(password_salt)
        .bind(verification_token_hash)
        .bind(verification_token_salt)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok((insert_result.rows_affected() > 0).then_some(user_id))
    }

    async fn verify_contact(&self, username: &Username, token: &str) -> Result<(), AuthFailure> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT user_id, verification_token_hash, verification_token_salt
             FROM users WHERE username = $1",
        )
        .bind(username.as_str())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        let row = row.ok_or(AuthFailure::Unauthorized)?;

        let user_id: String = row.try_get("user_id").map_err(|_| AuthFailure::Internal)?;
        let token_hash: Option<String> = row
            .try_get("verification_token_hash")
            .map_err(|_| AuthFailure::Internal)?;
        let token_salt: Option<String> = row
            .try_get("verification_token_salt")
            .map_err(|_| AuthFailure::Internal)?;
        let (Some(token_hash), Some(token_salt)) = (token_hash, token_salt) else {
            return Err(AuthFailure::Unauthorized);
        };

        let verified = self
            .state
            .hasher
            .verify(token, &token_hash, &token_salt)
            .map_err(|_| AuthFailure::Internal)?;
        if !verified {
            return Err(AuthFailure::Unauthorized);
        }

        // Clearing the token columns is what makes it single-use.
        sqlx::query(
            "UPDATE users
             SET verified = TRUE, verification_token_hash = NULL, verification_token_salt = NULL
             WHERE user_id = $1",
        )
        .bind(&user_id)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn authenticate(
        &self,
        username: &Username,
        password: &str,
        origin: &str,
        now_unix: i64,
    ) -> Result<UserId, AuthFailure> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT user_id, password_hash, password_salt, active, verified,
                    failed_attempts, last_failed_at_unix, is_locked, locked_until_unix
             FROM users WHERE username = $1",
        )
        .bind(username.as_str())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;

        let Some(row) = row else {
            let (dummy_hash, dummy_salt) = self.state.dummy_credential.as_ref();
            let _ = self.state.hasher.verify(password, dummy_hash, dummy_salt);
            return Err(AuthFailure::Unauthorized);
        };

        let user_id_text: String = row.try_get("user_id").map_err(|_| AuthFailure::Internal)?;
        let user_id =
            UserId::try_from(user_id_text.clone()).map_err(|_| AuthFailure::Internal)?;
        let password_hash: String = row
            .try_get("password_hash")
            .map_err(|_| AuthFailure::Internal)?;
        let password_salt: String = row
            .try_get("password_salt")
            .map_err(|_| AuthFailure::Internal)?;
        let active: bool = row.try_get("active").map_err(|_| AuthFailure::Internal)?;
        let verified: bool = row.try_get("verified").map_err(|_| AuthFailure::Internal)?;
        let mut lockout = Self::row_lockout_state(&row)?;

        // Inactive accounts are rejected before any lock or credential work
        // so they never accumulate lock state.
        if !active {
            return Err(AuthFailure::AccountInactive);
        }
        if !verified {
            return Err(AuthFailure::NotVerified);
        }

        let pre_gate = lockout;
        match lockout.gate(now_unix) {
            LockoutGate::Locked => return Err(AuthFailure::AccountLocked),
            LockoutGate::Proceed => {
                if lockout != pre_gate {
                    // Expired lock cleared lazily; persist the reset even if
                    // the verification below fails again.
                    self.persist_lockout(&user_id_text, lockout).await?;
                }
            }
        }

        let credential_ok = self
            .state
            .hasher
            .verify(password, &password_hash, &password_salt)
            .map_err(|_| AuthFailure::Internal)?;

        if credential_ok {
            lockout.record_success();
            sqlx::query(
                "UPDATE users
                 SET failed_attempts = 0, last_failed_at_unix = NULL,
                     is_locked = FALSE, locked_until_unix = NULL,
                     last_login_at_unix = $2, last_login_origin = $3
                 WHERE user_id = $1",
            )
            .bind(&user_id_text)
            .bind(now_unix)
            .bind(origin)
            .execute(self.pool)
            .await
            .map_err(|_| AuthFailure::Internal)?;
            return Ok(user_id);
        }

        lockout.record_failure(&self.state.lockout, now_unix);
        self.persist_lockout(&user_id_text, lockout).await?;
        Err(AuthFailure::Unauthorized)
    }

    async fn upsert_session(
        &self,
        user_id: UserId,
        refresh_token_hash: &str,
        refresh_token_salt: &str,
        expiry_unix: i64,
        now_unix: i64,
    ) -> Result<(), AuthFailure> {
        self.ensure_schema().await?;
        sqlx::query(
            "INSERT INTO sessions (user_id, refresh_token_hash, refresh_token_salt,
                                   refresh_token_expiry_unix, is_online, last_active_at_unix)
             VALUES ($1, $2, $3, $4, TRUE, $5)
             ON CONFLICT (user_id) DO UPDATE
             SET refresh_token_hash = EXCLUDED.refresh_token_hash,
                 refresh_token_salt = EXCLUDED.refresh_token_salt,
                 refresh_token_expiry_unix = EXCLUDED.refresh_token_expiry_unix,
                 is_online = TRUE,
                 last_active_at_unix = EXCLUDED.last_active_at_unix",
        )
        .bind(user_id.to_string())
        .bind(refresh_token_hash)
        .bind(refresh_token_salt)
        .bind(expiry_unix)
        .bind(now_unix)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: UserId,
        presented_token: &str,
        next_hash: &str,
        next_salt: &str,
        next_expiry_unix: i64,
        now_unix: i64,
    ) -> Result<(), AuthFailure> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT refresh_token_hash, refresh_token_salt, refresh_token_expiry_unix
             FROM sessions WHERE user_id = $1",
        )
        .bind(user_id.to_string())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        let row = row.ok_or(AuthFailure::Unauthorized)?;

        let stored_hash: String = row
            .try_get("refresh_token_hash")
            .map_err(|_| AuthFailure::Internal)?;
        let stored_salt: String = row
            .try_get("refresh_token_salt")
            .map_err(|_| AuthFailure::Internal)?;
        let expiry_unix: i64 = row
            .try_get("refresh_token_expiry_unix")
            .map_err(|_| AuthFailure::Internal)?;

        if expiry_unix < now_unix {
            return Err(AuthFailure::Unauthorized);
        }
        let token_ok = self
            .state
            .hasher
            .verify(presented_token, &stored_hash, &stored_salt)
            .map_err(|_| AuthFailure::Internal)?;
        if !token_ok {
            return Err(AuthFailure::Unauthorized);
        }

        // Compare-and-swap on the hash read above: a concurrent rotation of
        // the same token changes it first and this write affects zero rows.
        let update_result = sqlx::query(
            "UPDATE sessions
             SET refresh_token_hash = $2, refresh_token_salt = $3,
                 refresh_token_expiry_unix = $4, is_online = TRUE, last_active_at_unix = $5
             WHERE user_id = $1 AND refresh_token_hash = $6",
        )
        .bind(user_id.to_string())
        .bind(next_hash)
        .bind(next_salt)
        .bind(next_expiry_unix)
        .bind(now_unix)
        .bind(&stored_hash)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        if update_result.rows_affected() == 0 {
            return Err(AuthFailure::Unauthorized);
        }
        Ok(())
    }

    async fn close_session(
        &self,
        user_id: UserId,
        presented_token: &str,
        now_unix: i64,
    ) -> Result<(), AuthFailure> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT refresh_token_hash, refresh_token_salt FROM sessions WHERE user_id = $1",
        )
        .bind(user_id.to_string())
        .fetch_optional(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        let row = row.ok_or(AuthFailure::Unauthorized)?;

        let stored_hash: String = row
            .try_get("refresh_token_hash")
            .map_err(|_| AuthFailure::Internal)?;
        let stored_salt: String = row
            .try_get("refresh_token_salt")
            .map_err(|_| AuthFailure::Internal)?;
        let token_ok = self
            .state
            .hasher
            .verify(presented_token, &stored_hash, &stored_salt)
            .map_err(|_| AuthFailure::Internal)?;
        if !token_ok {
            return Err(AuthFailure::Unauthorized);
        }

        sqlx::query(
            "UPDATE sessions
             SET is_online = FALSE, refresh_token_expiry_unix = $2
             WHERE user_id = $1 AND refresh_token_hash = $3",
        )
        .bind(user_id.to_string())
        .bind(now_unix - 1)
        .bind(&stored_hash)
        .execute(self.pool)
        .await
        .map_err(|_| AuthFailure::Internal)?;
        Ok(())
    }

    async fn find_username_by_id(&self, user_id: UserId) -> Option<String> {
        self.ensure_schema().await.ok()?;
        let row = sqlx::query("SELECT username FROM users WHERE user_id = $1")
            .bind(user_id.to_string())
            .fetch_optional(self.pool)
            .await
            .ok()?;
        row.and_then(|value| value.try_get("username").ok())
    }
}

pub(crate) struct InMemoryAuthRepository<'a> {
    state: &'a AppState,
}

impl<'a> InMemoryAuthRepository<'a> {
    pub(crate) fn new(state: &'a AppState) -> Self {
        Self { state }
    }
}

impl AuthPersistence for InMemoryAuthRepository<'_> {
    async fn create_user_if_missing(
        &self,
        username: &Username,
        contact: &str,
        password_hash: &str,
        password_salt: &str,
        verification_token_hash: &str,
        verification_token_salt: &str,
    ) -> Result<Option<UserId>, AuthFailure> {
        let mut users = self.state.users.write().await;
        if users.contains_key(username.as_str()) {
            return Ok(None);
        }

        let user_id = UserId::new();
        users.insert(
            username.as_str().to_owned(),
            UserRecord {
                id: user_id,
                username: username.clone(),
                contact: contact.to_owned(),
                password_hash: password_hash.to_owned(),
                password_salt: password_salt.to_owned(),
                active: true,
                verified: false,
                verification_token_hash: Some(verification_token_hash.to_owned()),
                verification_token_salt: Some(verification_token_salt.to_owned()),
                lockout: LockoutState::default(),
                last_login_at_unix: None,
                last_login_origin: None,
            },
        );
        drop(users);

        self.state
            .user_ids
            .write()
            .await
            .insert(user_id.to_string(), username.as_str().to_owned());
        Ok(Some(user_id))
    }

    async fn verify_contact(&self, username: &Username, token: &str) -> Result<(), AuthFailure> {
        let mut users = self.state.users.write().await;
        let user = users
            .get_mut(username.as_str())
            .ok_or(AuthFailure::Unauthorized)?;
        let (Some(token_hash), Some(token_salt)) = (
            user.verification_token_hash.clone(),
            user.verification_token_salt.clone(),
        ) else {
            return Err(AuthFailure::Unauthorized);
        };

        let verified = self
            .state
            .hasher
            .verify(token, &token_hash, &token_salt)
            .map_err(|_| AuthFailure::Internal)?;
        if !verified {
            return Err(AuthFailure::Unauthorized);
        }

        user.verified = true;
        user.verification_token_hash = None;
        user.verification_token_salt = None;
        Ok(())
    }

    async fn authenticate(
        &self,
        username: &Username,
        password: &str,
        origin: &str,
        now_unix: i64,
    ) -> Result<UserId, AuthFailure> {
        // The whole attempt is one critical section over the user map, so
        // the read-modify-write of the lockout counters is a single
        // transaction per attempt.
        let mut users = self.state.users.write().await;
        let Some(user) = users.get_mut(username.as_str()) else {
            let (dummy_hash, dummy_salt) = self.state.dummy_credential.as_ref();
            let _ = self.state.hasher.verify(password, dummy_hash, dummy_salt);
            return Err(AuthFailure::Unauthorized);
        };

        if !user.active {
            return Err(AuthFailure::AccountInactive);
        }
        if !user.verified {
            return Err(AuthFailure::NotVerified);
        }

        if user.lockout.gate(now_unix) == LockoutGate::Locked {
            return Err(AuthFailure::AccountLocked);
        }

        let credential_ok = self
            .state
            .hasher
            .verify(password, &user.password_hash, &user.password_salt)
            .map_err(|_| AuthFailure::Internal)?;

        if credential_ok {
            user.lockout.record_success();
            user.last_login_at_unix = Some(now_unix);
            user.last_login_origin = Some(origin.to_owned());
            return Ok(user.id);
        }

        user.lockout.record_failure(&self.state.lockout, now_unix);
        Err(AuthFailure::Unauthorized)
    }

    async fn upsert_session(
        &self,
        user_id: UserId,
        refresh_token_hash: &str,
        refresh_token_salt: &str,
        expiry_unix: i64,
        now_unix: i64,
    ) -> Result<(), AuthFailure> {
        self.state.sessions.write().await.insert(
            user_id.to_string(),
            SessionRecord {
                user_id,
                refresh_token_hash: refresh_token_hash.to_owned(),
                refresh_token_salt: refresh_token_salt.to_owned(),
                refresh_token_expiry_unix: expiry_unix,
                is_online: true,
                last_active_at_unix: now_unix,
            },
        );
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: UserId,
        presented_token: &str,
        next_hash: &str,
        next_salt: &str,
        next_expiry_unix: i64,
        now_unix: i64,
    ) -> Result<(), AuthFailure> {
        // Verification and overwrite happen under one write lock, so the
        // second presentation of the same token always sees the new hash.
        let mut sessions = self.state.sessions.write().await;
        let session = sessions
            .get_mut(&user_id.to_string())
            .ok_or(AuthFailure::Unauthorized)?;

        if session.refresh_token_expiry_unix < now_unix {
            return Err(AuthFailure::Unauthorized);
        }
        let token_ok = self
            .state
            .hasher
            .verify(
                presented_token,
                &session.refresh_token_hash,
                &session.refresh_token_salt,
            )
            .map_err(|_| AuthFailure::Internal)?;
        if !token_ok {
            return Err(AuthFailure::Unauthorized);
        }

        session.refresh_token_hash = next_hash.to_owned();
        session.refresh_token_salt = next_salt.to_owned();
        session.refresh_token_expiry_unix = next_expiry_unix;
        session.is_online = true;
        session.last_active_at_unix = now_unix;
        Ok(())
    }

    async fn close_session(
        &self,
        user_id: UserId,
        presented_token: &str,
        now_unix: i64,
    ) -> Result<(), AuthFailure> {
        let mut sessions = self.state.sessions.write().await;
        let session = sessions
            .get_mut(&user_id.to_string())
            .ok_or(AuthFailure::Unauthorized)?;

        let token_ok = self
            .state
            .hasher
            .verify(
                presented_token,
                &session.refresh_token_hash,
                &session.refresh_token_salt,
            )
            .map_err(|_| AuthFailure::Internal)?;
        if !token_ok {
            return Err(AuthFailure::Unauthorized);
        }

        session.is_online = false;
        session.refresh_token_expiry_unix = now_unix - 1;
        Ok(())
    }

    async fn find_username_by_id(&self, user_id: UserId) -> Option<String> {
        self.state
            .user_ids
            .read()
            .await
            .get(&user_id.to_string())
            .cloned()
    }
}

pub(crate) enum AuthRepository<'a> {
    Postgres(PostgresAuthRepository<'a>),
    InMemory(InMemoryAuthRepository<'a>),
}

impl AuthRepository<'_> {
    pub(crate) fn from_state(state: &AppState) -> AuthRepository<'_> {
        if let Some(pool) = &state.db_pool {
            AuthRepository::Postgres(PostgresAuthRepository::new(state, pool))
        } else {
            AuthRepository::InMemory(InMemoryAuthRepository::new(state))
        }
    }
}

impl AuthPersistence for AuthRepository<'_> {
    async fn create_user_if_missing(
        &self,
        username: &Username,
        contact: &str,
        password_hash: &str,
        password_salt: &str,
        verification_token_hash: &str,
        verification_token_salt: &str,
    ) -> Result<Option<UserId>, AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.create_user_if_missing(
                    username,
                    contact,
                    password_hash,
                    password_salt,
                    verification_token_hash,
                    verification_token_salt,
                )
                .await
            }
            Self::InMemory(repo) => {
                repo.create_user_if_missing(
                    username,
                    contact,
                    password_hash,
                    password_salt,
                    verification_token_hash,
                    verification_token_salt,
                )
                .await
            }
        }
    }

    async fn verify_contact(&self, username: &Username, token: &str) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.verify_contact(username, token).await,
            Self::InMemory(repo) => repo.verify_contact(username, token).await,
        }
    }

    async fn authenticate(
        &self,
        username: &Username,
        password: &str,
        origin: &str,
        now_unix: i64,
    ) -> Result<UserId, AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.authenticate(username, password, origin, now_unix).await,
            Self::InMemory(repo) => repo.authenticate(username, password, origin, now_unix).await,
        }
    }

    async fn upsert_session(
        &self,
        user_id: UserId,
        refresh_token_hash: &str,
        refresh_token_salt: &str,
        expiry_unix: i64,
        now_unix: i64,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.upsert_session(
                    user_id,
                    refresh_token_hash,
                    refresh_token_salt,
                    expiry_unix,
                    now_unix,
                )
                .await
            }
            Self::InMemory(repo) => {
                repo.upsert_session(
                    user_id,
                    refresh_token_hash,
                    refresh_token_salt,
                    expiry_unix,
                    now_unix,
                )
                .await
            }
        }
    }

    async fn rotate_refresh_token(
        &self,
        user_id: UserId,
        presented_token: &str,
        next_hash: &str,
        next_salt: &str,
        next_expiry_unix: i64,
        now_unix: i64,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => {
                repo.rotate_refresh_token(
                    user_id,
                    presented_token,
                    next_hash,
                    next_salt,
                    next_expiry_unix,
                    now_unix,
                )
                .await
            }
            Self::InMemory(repo) => {
                repo.rotate_refresh_token(
                    user_id,
                    presented_token,
                    next_hash,
                    next_salt,
                    next_expiry_unix,
                    now_unix,
                )
                .await
            }
        }
    }

    async fn close_session(
        &self,
        user_id: UserId,
        presented_token: &str,
        now_unix: i64,
    ) -> Result<(), AuthFailure> {
        match self {
            Self::Postgres(repo) => repo.close_session(user_id, presented_token, now_unix).await,
            Self::InMemory(repo) => repo.close_session(user_id, presented_token, now_unix).await,
        }
    }

    async fn find_username_by_id(&self, user_id: UserId) -> Option<String> {
        match self {
            Self::Postgres(repo) => repo.find_username_by_id(user_id).await,
            Self::InMemory(repo) => repo.find_username_by_id(user_id).await,
        }
    }
}
