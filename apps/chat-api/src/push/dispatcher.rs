//! Background push delivery.
//!
//! Routing enqueues a [`PushJob`] with `try_send` and moves on; a fixed pool
//! of workers drains the queue. Jobs belong to a user identity, not a socket,
//! so a client disconnecting never cancels its pending pushes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::db::store::ChatStore;
use crate::models::user::User;

use super::transport::{PushError, PushTransport};

/// Longest notification body; longer content is cut at a char boundary.
pub const MAX_BODY_CHARS: usize = 100;

/// The notification shown by the client.
#[derive(Debug, Clone, Serialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub icon: &'static str,
    pub badge: &'static str,
    pub vibrate: [u16; 3],
    pub data: Value,
}

impl PushNotification {
    pub fn new(title: impl Into<String>, body: &str, data: Value) -> Self {
        Self {
            title: title.into(),
            body: truncate_body(body),
            icon: "/icon-192x192.png",
            badge: "/badge-72x72.png",
            vibrate: [100, 50, 100],
            data,
        }
    }

    /// The JSON document handed to the transport.
    pub fn payload(&self) -> String {
        serde_json::json!({ "notification": self }).to_string()
    }
}

pub fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_BODY_CHARS).collect()
}

/// Who a job is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushRecipients {
    User(String),
    /// Every known user except the named one (public messages).
    AllExcept(String),
}

#[derive(Debug, Clone)]
pub struct PushJob {
    pub recipients: PushRecipients,
    pub notification: PushNotification,
}

/// Counters for one job, mostly for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub removed: usize,
    pub failed: usize,
}

impl DeliveryReport {
    fn merge(&mut self, other: DeliveryReport) {
        self.attempted += other.attempted;
        self.delivered += other.delivered;
        self.removed += other.removed;
        self.failed += other.failed;
    }
}

/// Handle used to schedule pushes. Cheap to clone.
///
/// All clones share one sender slot, so [`PushDispatcher::close`] stops the
/// queue even while sessions still hold handles.
#[derive(Clone)]
pub struct PushDispatcher {
    tx: Arc<RwLock<Option<mpsc::Sender<PushJob>>>>,
}

/// The spawned workers. Await [`PushWorkers::drain`] at shutdown after
/// [`PushDispatcher::close`].
pub struct PushWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl PushDispatcher {
    /// Spawn `workers` tasks sharing a queue of `capacity` jobs.
    pub fn start(
        store: Arc<dyn ChatStore>,
        transport: Arc<dyn PushTransport>,
        workers: usize,
        capacity: usize,
    ) -> (Self, PushWorkers) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let store = store.clone();
                let transport = transport.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only while waiting for a job.
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else { break };
                        let report = deliver(store.as_ref(), transport.as_ref(), &job).await;
                        tracing::debug!(
                            worker,
                            recipients = ?job.recipients,
                            attempted = report.attempted,
                            delivered = report.delivered,
                            removed = report.removed,
                            failed = report.failed,
                            "push job finished"
                        );
                    }
                })
            })
            .collect();

        (
            Self {
                tx: Arc::new(RwLock::new(Some(tx))),
            },
            PushWorkers { handles },
        )
    }

    /// Schedule a notification for one user. Never blocks; a full queue
    /// drops the job with a warning.
    pub fn dispatch(&self, username: &str, title: impl Into<String>, body: &str, data: Value) {
        self.enqueue(PushJob {
            recipients: PushRecipients::User(username.to_string()),
            notification: PushNotification::new(title, body, data),
        });
    }

    /// Schedule a notification for every known user except `exclude`.
    pub fn dispatch_all_except(
        &self,
        exclude: &str,
        title: impl Into<String>,
        body: &str,
        data: Value,
    ) {
        self.enqueue(PushJob {
            recipients: PushRecipients::AllExcept(exclude.to_string()),
            notification: PushNotification::new(title, body, data),
        });
    }

    pub fn enqueue(&self, job: PushJob) {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            tracing::debug!(recipients = ?job.recipients, "push queue closed, dropping job");
            return;
        };
        match tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(recipients = ?job.recipients, "push queue full, dropping job");
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(recipients = ?job.recipients, "push workers stopped, dropping job");
            }
        }
    }
}

impl PushDispatcher {
    /// Stop accepting jobs. Workers exit once the queued jobs are done.
    pub fn close(&self) {
        self.tx.write().take();
    }
}

impl PushWorkers {
    /// Wait up to `timeout` for queued jobs to finish.
    pub async fn drain(self, timeout: Duration) {
        let all = futures_util::future::join_all(self.handles);
        if tokio::time::timeout(timeout, all).await.is_err() {
            tracing::warn!("push workers did not finish before shutdown timeout");
        }
    }
}

/// Deliver one job to every target of every recipient.
///
/// Each target is tried exactly once and independently. A target the
/// transport reports as gone is deleted; other failures are logged.
pub async fn deliver(
    store: &dyn ChatStore,
    transport: &dyn PushTransport,
    job: &PushJob,
) -> DeliveryReport {
    let payload = job.notification.payload();
    let mut report = DeliveryReport::default();

    match &job.recipients {
        PushRecipients::User(username) => match store.find_user_by_username(username).await {
            Ok(Some(user)) => report.merge(deliver_to_user(store, transport, &user, &payload).await),
            Ok(None) => tracing::debug!(%username, "push skipped, unknown user"),
            Err(err) => tracing::warn!(%username, %err, "push skipped, user lookup failed"),
        },
        PushRecipients::AllExcept(exclude) => match store.list_users().await {
            Ok(users) => {
                for user in users.iter().filter(|u| &u.username != exclude) {
                    report.merge(deliver_to_user(store, transport, user, &payload).await);
                }
            }
            Err(err) => tracing::warn!(%err, "push skipped, user listing failed"),
        },
    }

    report
}

async fn deliver_to_user(
    store: &dyn ChatStore,
    transport: &dyn PushTransport,
    user: &User,
    payload: &str,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let targets = match store.list_push_targets(user.id).await {
        Ok(targets) => targets,
        Err(err) => {
            tracing::warn!(username = %user.username, %err, "failed to load push targets");
            return report;
        }
    };

    for target in &targets {
        report.attempted += 1;
        match transport.send(target, payload).await {
            Ok(()) => report.delivered += 1,
            Err(PushError::Gone) => {
                match store.delete_push_target(&target.endpoint).await {
                    Ok(_) => {
                        report.removed += 1;
                        tracing::info!(
                            username = %user.username,
                            endpoint = %target.endpoint,
                            "removed expired push subscription"
                        );
                    }
                    Err(err) => tracing::warn!(
                        endpoint = %target.endpoint,
                        %err,
                        "failed to delete stale push target"
                    ),
                }
            }
            Err(err) => {
                report.failed += 1;
                tracing::warn!(
                    username = %user.username,
                    endpoint = %target.endpoint,
                    %err,
                    "push delivery failed"
                );
            }
        }
    }

    report
}
