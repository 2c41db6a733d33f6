#![forbid(unsafe_code)]

use ulid::Ulid;

/// Returns the project code name.
#[must_use]
pub const fn project_name() -> &'static str {
    "strand"
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("username is invalid")]
    InvalidUsername,
    #[error("user id is invalid")]
    InvalidUserId,
    #[error("contact address is invalid")]
    InvalidContactAddress,
    #[error("message content is invalid")]
    InvalidMessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(Ulid);

impl UserId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Ulid::from_string(&value).map_err(|_| DomainError::InvalidUserId)?;
        Ok(Self(parsed))
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_username(&value)?;
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContactAddress(String);

impl ContactAddress {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContactAddress {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_contact_address(&value)?;
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageContent(String);

impl MessageContent {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MessageContent {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_message_content(&value)?;
        Ok(Self(value))
    }
}

fn validate_username(value: &str) -> Result<(), DomainError> {
    if !(3..=32).contains(&value.len()) {
        return Err(DomainError::InvalidUsername);
    }

    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Ok(());
    }

    Err(DomainError::InvalidUsername)
}

fn validate_contact_address(value: &str) -> Result<(), DomainError> {
    if !(3..=254).contains(&value.len()) {
        return Err(DomainError::InvalidContactAddress);
    }

    // Delivery-grade parsing belongs to the mail collaborator; the record
    // only needs a plausible mailbox shape.
    let Some((local, domain)) = value.split_once('@') else {
        return Err(DomainError::InvalidContactAddress);
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(DomainError::InvalidContactAddress);
    }
    if value.chars().any(char::is_whitespace) || value.contains('\0') {
        return Err(DomainError::InvalidContactAddress);
    }
    Ok(())
}

fn validate_message_content(value: &str) -> Result<(), DomainError> {
    if !(1..=2000).contains(&value.len()) {
        return Err(DomainError::InvalidMessageContent);
    }
    if value.contains('\0') {
        return Err(DomainError::InvalidMessageContent);
    }
    Ok(())
}
