use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

pub const MIN_SALT_BYTES: usize = 16;
pub const MAX_SALT_BYTES: usize = 64;
pub const MIN_ITERATIONS: u32 = 10_000;
pub const MAX_ITERATIONS: u32 = 1_000_000;
pub const DEFAULT_SALT_BYTES: usize = 32;
pub const DEFAULT_ITERATIONS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    const fn digest_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }
}

impl TryFrom<&str> for DigestAlgorithm {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HasherConfig {
    pub salt_len_bytes: usize,
    pub iterations: u32,
    pub algorithm: DigestAlgorithm,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            salt_len_bytes: DEFAULT_SALT_BYTES,
            iterations: DEFAULT_ITERATIONS,
            algorithm: DigestAlgorithm::Sha256,
        }
    }
}

impl HasherConfig {
    /// Clamps out-of-bounds settings to the validated defaults. Hashing has
    /// no disabled mode: an unauthenticatable process is worse than one
    /// running with default-strength parameters, so misconfiguration is
    /// logged loudly and corrected rather than fatal.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let mut sanitized = self;
        if !(MIN_SALT_BYTES..=MAX_SALT_BYTES).contains(&self.salt_len_bytes) {
            tracing::error!(
                event = "hasher.config_invalid",
                field = "salt_len_bytes",
                configured = self.salt_len_bytes,
                fallback = DEFAULT_SALT_BYTES,
                "salt length outside {MIN_SALT_BYTES}..={MAX_SALT_BYTES}, using default"
            );
            sanitized.salt_len_bytes = DEFAULT_SALT_BYTES;
        }
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.iterations) {
            tracing::error!(
                event = "hasher.config_invalid",
                field = "iterations",
                configured = self.iterations,
                fallback = DEFAULT_ITERATIONS,
                "iteration count outside {MIN_ITERATIONS}..={MAX_ITERATIONS}, using default"
            );
            sanitized.iterations = DEFAULT_ITERATIONS;
        }
        sanitized
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HashError {
    /// Empty plaintext, hash, or salt: a caller-input problem.
    InvalidInput,
    /// Stored hash or salt fails to decode: persisted-data corruption.
    CorruptStoredValue,
}

/// Deterministic-salted credential hashing with fixed-time verification.
///
/// Stores digest and salt as separate base64 strings so the same derivation
/// covers passwords, refresh tokens, and verification tokens.
#[derive(Debug, Clone)]
pub(crate) struct CredentialHasher {
    config: HasherConfig,
}

impl CredentialHasher {
    pub(crate) fn new(config: HasherConfig) -> Self {
        Self {
            config: config.sanitized(),
        }
    }

    pub(crate) fn hash(&self, plain: &str) -> Result<(String, String), HashError> {
        if plain.is_empty() {
            return Err(HashError::InvalidInput);
        }
        let mut salt = vec![0_u8; self.config.salt_len_bytes];
        OsRng.fill_bytes(&mut salt);
        let digest = self.derive(plain.as_bytes(), &salt);
        Ok((STANDARD.encode(digest), STANDARD.encode(salt)))
    }

    pub(crate) fn verify(
        &self,
        plain: &str,
        hash_b64: &str,
        salt_b64: &str,
    ) -> Result<bool, HashError> {
        if plain.is_empty() || hash_b64.is_empty() || salt_b64.is_empty() {
            return Err(HashError::InvalidInput);
        }
        let stored = STANDARD
            .decode(hash_b64)
            .map_err(|_| HashError::CorruptStoredValue)?;
        let salt = STANDARD
            .decode(salt_b64)
            .map_err(|_| HashError::CorruptStoredValue)?;
        let derived = self.derive(plain.as_bytes(), &salt);
        Ok(bool::from(derived.as_slice().ct_eq(stored.as_slice())))
    }

    fn derive(&self, plain: &[u8], salt: &[u8]) -> Vec<u8> {
        let mut out = vec![0_u8; self.config.algorithm.digest_len()];
        match self.config.algorithm {
            DigestAlgorithm::Sha256 => {
                pbkdf2_hmac::<Sha256>(plain, salt, self.config.iterations, &mut out);
            }
            DigestAlgorithm::Sha512 => {
                pbkdf2_hmac::<Sha512>(plain, salt, self.config.iterations, &mut out);
            }
        }
        out
    }
}

/// Fills `byte_len` random bytes and encodes them URL-safe without padding.
/// Used for refresh-token secrets and contact-verification tokens alike.
pub(crate) fn generate_token(byte_len: usize) -> String {
    let mut bytes = vec![0_u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
