//! Mail provider integration — history diffs, message content, watch
//! registration. All Gmail REST; pure I/O, no scoring or cursor policy.

pub mod history;
pub mod message;
pub mod watch;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::MailApiError;
use crate::store::UserAccount;

pub use history::{GmailHistory, HistoryFetcher};
pub use message::{GmailMessages, MessageDetails, MessageFetcher};

/// Source of per-user API access tokens.
///
/// Token acquisition and refresh belong to the credential subsystem; the
/// mail clients only ask for a usable bearer token for a given user.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self, user: &UserAccount) -> Result<SecretString, MailApiError>;
}

/// Token source backed by a single pre-issued token.
///
/// Suitable for single-mailbox deployments and tests; a real multi-user
/// deployment plugs in a source that resolves `user.token_ref`.
pub struct StaticTokenSource {
    token: SecretString,
}

impl StaticTokenSource {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self, _user: &UserAccount) -> Result<SecretString, MailApiError> {
        Ok(self.token.clone())
    }
}
