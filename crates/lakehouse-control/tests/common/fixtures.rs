//! Test fixtures for lakehouse-control integration tests.

use lakehouse_control::{
    AccountContext, AccountUser, InstallationDetails, InstallationId, StackOutputs, UserDirectory,
};

/// Builder for creating test InstallationDetails instances.
pub struct InstallationBuilder {
    id: String,
    name: String,
    account: Option<AccountContext>,
    stack: Option<StackOutputs>,
}

impl InstallationBuilder {
    /// Creates a new installation builder with the given ID.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Lake {id}"),
            account: None,
            stack: None,
        }
    }

    /// Sets the account the installation targets.
    pub fn with_account(mut self, account_id: &str, region: &str) -> Self {
        self.account = Some(AccountContext::new(account_id, region));
        self
    }

    /// Marks the data-lake stack as created.
    pub fn provisioned(mut self) -> Self {
        self.stack = Some(StackOutputs {
            stack_name: format!("lakehouse-{}", self.id),
            bucket_name: format!("lakehouse-{}-raw", self.id),
            database_name: format!("lakehouse_{}", self.id),
            log_group: None,
        });
        self
    }

    /// Builds the InstallationDetails.
    pub fn build(self) -> InstallationDetails {
        InstallationDetails {
            id: InstallationId::new(self.id),
            name: self.name,
            account: self.account,
            stack: self.stack,
        }
    }
}

/// A directory with one admin and `members` regular users.
pub fn users(members: usize) -> UserDirectory {
    let mut users = vec![AccountUser {
        name: "admin".to_string(),
        arn: "arn:aws:iam::123456789012:user/admin".to_string(),
        admin: true,
    }];
    users.extend((0..members).map(|i| AccountUser {
        name: format!("user-{i}"),
        arn: format!("arn:aws:iam::123456789012:user/user-{i}"),
        admin: false,
    }));
    UserDirectory { users }
}
