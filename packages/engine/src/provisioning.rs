//! Interface to the external version-control / project-tracking service.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("external service unavailable: {0}")]
    Unavailable(String),

    #[error("external service rejected the request: {0}")]
    Rejected(String),

    #[error("external service is not configured")]
    NotConfigured,
}

/// Issue created on a board, with the board item that wraps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIssue {
    pub issue_id: String,
    pub item_id: String,
}

/// External resource provisioning.
///
/// Calls are not idempotent from the engine's side: a retried call may create a duplicate.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a tracking board and return its id.
    async fn create_board(&self, owner_token: &str, title: &str) -> Result<String, ProvisionError>;

    /// Create a repository and return its id.
    async fn create_repository(
        &self,
        owner_token: &str,
        name: &str,
        description: &str,
    ) -> Result<String, ProvisionError>;

    async fn create_issue(
        &self,
        owner_token: &str,
        board_id: &str,
        repo_id: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue, ProvisionError>;

    async fn delete_repository(&self, owner_token: &str, repo_id: &str)
    -> Result<(), ProvisionError>;
}

/// Provisioner used when no external service is configured. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledProvisioner;

#[async_trait]
impl Provisioner for DisabledProvisioner {
    async fn create_board(&self, _: &str, _: &str) -> Result<String, ProvisionError> {
        Err(ProvisionError::NotConfigured)
    }

    async fn create_repository(&self, _: &str, _: &str, _: &str) -> Result<String, ProvisionError> {
        Err(ProvisionError::NotConfigured)
    }

    async fn create_issue(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
    ) -> Result<CreatedIssue, ProvisionError> {
        Err(ProvisionError::NotConfigured)
    }

    async fn delete_repository(&self, _: &str, _: &str) -> Result<(), ProvisionError> {
        Err(ProvisionError::NotConfigured)
    }
}

/// Repository name for a cloned project: a lowercase slug of the title plus the project id.
pub fn repository_name(title: &str, project_id: i32) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        format!("project-{project_id}")
    } else {
        format!("{slug}-{project_id}")
    }
}
