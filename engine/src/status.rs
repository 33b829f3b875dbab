//! Session status types: authenticated user, error slots and progress flags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The authenticated user as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            provider_id: None,
            email: None,
            display_name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }
}

/// Error codes reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorCode {
    PermissionDenied,
    InvalidCredentials,
    UserNotFound,
    EmailInUse,
    Disconnected,
    InvalidRequest,
    Other(String),
}

impl fmt::Display for RemoteErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorCode::PermissionDenied => write!(f, "permission_denied"),
            RemoteErrorCode::InvalidCredentials => write!(f, "invalid_credentials"),
            RemoteErrorCode::UserNotFound => write!(f, "user_not_found"),
            RemoteErrorCode::EmailInUse => write!(f, "email_in_use"),
            RemoteErrorCode::Disconnected => write!(f, "disconnected"),
            RemoteErrorCode::InvalidRequest => write!(f, "invalid_request"),
            RemoteErrorCode::Other(code) => write!(f, "{}", code),
        }
    }
}

/// An error reported by the remote store. Stored in the mirror as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: RemoteErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn permission_denied(path: &str) -> Self {
        Self::new(
            RemoteErrorCode::PermissionDenied,
            format!("permission denied at '{}'", path),
        )
    }

    pub fn is_permission_denied(&self) -> bool {
        self.code == RemoteErrorCode::PermissionDenied
    }
}

/// Authentication operations that carry their own progress and error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthSlot {
    Login,
    CreateUser,
    ResetPassword,
}

/// Named error slots. `Permissions` is set when a listener is revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorSlot {
    Permissions,
    Login,
    CreateUser,
    ResetPassword,
}

impl From<AuthSlot> for ErrorSlot {
    fn from(slot: AuthSlot) -> Self {
        match slot {
            AuthSlot::Login => ErrorSlot::Login,
            AuthSlot::CreateUser => ErrorSlot::CreateUser,
            AuthSlot::ResetPassword => ErrorSlot::ResetPassword,
        }
    }
}

/// Errors by slot. A slot keeps its error until explicitly cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSlots {
    pub permissions: Option<RemoteError>,
    pub login: Option<RemoteError>,
    pub create_user: Option<RemoteError>,
    pub reset_password: Option<RemoteError>,
}

impl ErrorSlots {
    pub fn get(&self, slot: ErrorSlot) -> Option<&RemoteError> {
        match slot {
            ErrorSlot::Permissions => self.permissions.as_ref(),
            ErrorSlot::Login => self.login.as_ref(),
            ErrorSlot::CreateUser => self.create_user.as_ref(),
            ErrorSlot::ResetPassword => self.reset_password.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, slot: ErrorSlot) -> &mut Option<RemoteError> {
        match slot {
            ErrorSlot::Permissions => &mut self.permissions,
            ErrorSlot::Login => &mut self.login,
            ErrorSlot::CreateUser => &mut self.create_user,
            ErrorSlot::ResetPassword => &mut self.reset_password,
        }
    }
}

/// Boolean flag per auth operation (used for both processing and completed).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagSlots {
    pub login: bool,
    pub create_user: bool,
    pub reset_password: bool,
}

impl FlagSlots {
    pub fn get(&self, slot: AuthSlot) -> bool {
        match slot {
            AuthSlot::Login => self.login,
            AuthSlot::CreateUser => self.create_user,
            AuthSlot::ResetPassword => self.reset_password,
        }
    }

    pub fn slot_mut(&mut self, slot: AuthSlot) -> &mut bool {
        match slot {
            AuthSlot::Login => &mut self.login,
            AuthSlot::CreateUser => &mut self.create_user,
            AuthSlot::ResetPassword => &mut self.reset_password,
        }
    }
}
