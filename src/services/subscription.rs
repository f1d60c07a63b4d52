use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::auth::session::SessionUser;
use crate::error::{AppError, AppResult};
use crate::models::subscription::{SubscriptionCheckResponse, SubscriptionState};

/// Where the current billing entitlement comes from.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn check(&self, user: &SessionUser) -> AppResult<SubscriptionCheckResponse>;
}

/// Calls the `check-subscription` function with the user's access token.
#[derive(Clone)]
pub struct HttpSubscriptionSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSubscriptionSource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SubscriptionSource for HttpSubscriptionSource {
    async fn check(&self, user: &SessionUser) -> AppResult<SubscriptionCheckResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&user.access_token)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Subscription check failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Subscription check failed: {}", e)))?;

        response
            .json::<SubscriptionCheckResponse>()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Subscription parse error: {}", e)))
    }
}

struct Sequenced {
    state: SubscriptionState,
    applied_seq: u64,
}

/// Holds the signed-in user's subscription and keeps it fresh.
///
/// Failures never reach callers: they are logged and the previous state
/// stays visible until the next successful refresh.
pub struct SubscriptionService {
    source: Arc<dyn SubscriptionSource>,
    current: RwLock<Sequenced>,
    next_seq: AtomicU64,
}

impl SubscriptionService {
    pub fn new(source: Arc<dyn SubscriptionSource>) -> Self {
        Self {
            source,
            current: RwLock::new(Sequenced {
                state: SubscriptionState::default(),
                applied_seq: 0,
            }),
            next_seq: AtomicU64::new(0),
        }
    }

    pub async fn snapshot(&self) -> SubscriptionState {
        self.current.read().await.state.clone()
    }

    pub async fn refresh(&self, user: Option<&SessionUser>) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let Some(user) = user else {
            self.apply(seq, SubscriptionState::default()).await;
            return;
        };

        match self.source.check(user).await {
            Ok(response) => {
                let state = SubscriptionState::from(response);
                if self.apply(seq, state).await {
                    tracing::debug!(user_id = %user.id, seq = seq, "Subscription state refreshed");
                }
            }
            Err(e) => {
                tracing::error!(user_id = %user.id, error = %e, "Failed to refresh subscription status");
            }
        }
    }

    /// Refreshes now and again on every identity change until the session goes away.
    pub fn watch_session(
        self: &Arc<Self>,
        mut rx: watch::Receiver<Option<SessionUser>>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let user = rx.borrow_and_update().clone();
                service.refresh(user.as_ref()).await;
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    async fn apply(&self, seq: u64, state: SubscriptionState) -> bool {
        let mut current = self.current.write().await;
        if seq < current.applied_seq {
            tracing::debug!(seq = seq, applied = current.applied_seq, "Discarding stale subscription response");
            return false;
        }
        current.applied_seq = seq;
        current.state = state;
        true
    }
}
