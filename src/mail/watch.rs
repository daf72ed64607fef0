//! Mailbox watch registration and renewal.
//!
//! The provider only pushes notifications while a watch is active, and
//! watches expire (Gmail: after seven days). A background ticker
//! re-registers the watch for every known user well inside that window.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::MailApiConfig;
use crate::error::MailApiError;
use crate::mail::TokenSource;
use crate::store::{Database, UserAccount};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    pub history_id: String,
    pub expiration: String,
}

/// Register (or renew) the inbox watch for one user.
pub async fn register_watch(
    client: &reqwest::Client,
    config: &MailApiConfig,
    tokens: &Arc<dyn TokenSource>,
    user: &UserAccount,
    topic: &str,
) -> Result<WatchResponse, MailApiError> {
    let endpoint = format!("{}/users/{}/watch", config.base_url, user.email);
    let token = tokens.access_token(user).await?;

    let body = serde_json::json!({
        "labelIds": ["INBOX"],
        "topicName": topic,
    });

    let response = client
        .post(&endpoint)
        .bearer_auth(token.expose_secret())
        .json(&body)
        .send()
        .await
        .map_err(|e| MailApiError::RequestFailed {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(MailApiError::BadStatus {
            endpoint,
            status: status.as_u16(),
        });
    }

    response
        .json()
        .await
        .map_err(|e| MailApiError::InvalidResponse {
            endpoint,
            reason: e.to_string(),
        })
}

/// Spawn a background task that periodically renews watches for all users.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop.
pub fn spawn_watch_renewal(
    config: MailApiConfig,
    tokens: Arc<dyn TokenSource>,
    db: Arc<dyn Database>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        let Some(topic) = config.watch_topic.clone() else {
            warn!("No watch topic configured — watch renewal disabled");
            return;
        };

        let client = match reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to build watch HTTP client: {e}");
                return;
            }
        };

        info!(
            interval_secs = config.watch_renew_interval.as_secs(),
            topic = %topic,
            "Watch renewal started"
        );

        let mut tick = tokio::time::interval(config.watch_renew_interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Watch renewal shutting down");
                return;
            }

            renew_all(&client, &config, &tokens, &db, &topic).await;
        }
    });

    (handle, shutdown_flag)
}

/// One renewal sweep over all users. Per-user failures are logged and do
/// not stop the sweep.
async fn renew_all(
    client: &reqwest::Client,
    config: &MailApiConfig,
    tokens: &Arc<dyn TokenSource>,
    db: &Arc<dyn Database>,
    topic: &str,
) {
    let users = match db.list_users().await {
        Ok(users) => users,
        Err(e) => {
            error!("Watch renewal could not list users: {e}");
            return;
        }
    };

    for user in &users {
        match register_watch(client, config, tokens, user, topic).await {
            Ok(watch) => info!(
                user = %user.email,
                expiration = %watch.expiration,
                "Watch renewed"
            ),
            Err(e) => warn!(user = %user.email, error = %e, "Watch renewal failed"),
        }
    }
}
