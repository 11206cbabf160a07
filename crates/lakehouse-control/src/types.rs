//! Core types for lakehouse-control.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a provisioned (or in-progress) data-lake installation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallationId(String);

impl InstallationId {
    /// Create a new installation ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for InstallationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a single deployment attempt.
///
/// Every trigger or retry starts a fresh attempt; reports tagged with an
/// older attempt are discarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(String);

impl AttemptId {
    /// Create an attempt ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique attempt ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure reported by a remote collaborator.
///
/// Stored on a resource store in the `Error` state, or on an operation in
/// the `Failure` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Human-readable description.
    pub message: String,
    /// Error code reported by the remote API, when one was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorDetail {
    /// Create an error detail with just a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach the remote error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<&str> for ErrorDetail {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ErrorDetail {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Credentials and placement of the customer account an installation
/// deploys into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContext {
    /// Cloud account identifier.
    pub account_id: String,
    /// Region the data lake is created in.
    pub region: String,
    /// Role assumed for cross-account calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// External ID presented when assuming the role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl AccountContext {
    /// Create an account context without a cross-account role.
    #[must_use]
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            role_arn: None,
            external_id: None,
        }
    }

    /// Set the role assumed for cross-account calls.
    #[must_use]
    pub fn with_role(mut self, role_arn: impl Into<String>, external_id: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self.external_id = Some(external_id.into());
        self
    }
}

/// Outputs of the data-lake stack, present once it has been created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutputs {
    /// Name of the stack in the customer account.
    pub stack_name: String,
    /// Bucket holding the lake's raw data.
    pub bucket_name: String,
    /// Catalogue database registered for the lake.
    pub database_name: String,
    /// Log group receiving ingestion logs, once configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_group: Option<String>,
}

/// Remote view of an installation, as returned by the installation API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationDetails {
    /// Installation identifier.
    pub id: InstallationId,
    /// Display name chosen in the wizard.
    pub name: String,
    /// Account the installation targets, once credentials were validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountContext>,
    /// Stack outputs, once the data-lake stack exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<StackOutputs>,
}

impl InstallationDetails {
    /// Parse and validate a raw installation payload.
    pub fn from_json(raw: &str) -> Result<Self, ErrorDetail> {
        serde_json::from_str(raw).map_err(|e| {
            ErrorDetail::new(format!("malformed installation payload: {e}"))
                .with_code("InvalidPayload")
        })
    }

    /// Bucket of the provisioned lake, if the stack exists.
    #[must_use]
    pub fn data_lake_bucket(&self) -> Option<&str> {
        self.stack.as_ref().map(|s| s.bucket_name.as_str())
    }

    /// Whether the data-lake stack has been created.
    #[must_use]
    pub const fn is_provisioned(&self) -> bool {
        self.stack.is_some()
    }
}

/// A user with access to an installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUser {
    /// User name.
    pub name: String,
    /// Identity ARN of the user.
    pub arn: String,
    /// Whether the user may administer the lake.
    #[serde(default)]
    pub admin: bool,
}

/// Users of one installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDirectory {
    /// Users in the order the remote API returned them.
    pub users: Vec<AccountUser>,
}

impl UserDirectory {
    /// Number of administrators.
    #[must_use]
    pub fn admin_count(&self) -> usize {
        self.users.iter().filter(|u| u.admin).count()
    }
}
