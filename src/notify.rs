//! Notification dispatcher.
//!
//! `emit` appends to an append-only log and then fans out to registered
//! listeners, synchronously and in log order. Delivery failures never undo
//! the state change that produced the notification: failed deliveries are
//! queued and retried independently, up to a bounded number of attempts.
//! Every notification is also queued for the external sink
//! ([`CaseRepository::notify_external`]) and forwarded by the engine's
//! write-behind flush, never by the producing operation.
//!
//! Delivery is at-least-once. Consumers de-duplicate on [`NotificationId`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::model::{CaseId, Notification, NotificationId, NotificationKind, Severity, StageId};
use crate::repository::CaseRepository;
use crate::telemetry::metrics;

/// Capacity of each channel subscription.
const SUBSCRIPTION_BUFFER: usize = 256;

/// A synchronous consumer of notifications.
///
/// `deliver` runs on the emitting task while the log is held in order, so
/// it must not block. Heavy work belongs behind a channel (see
/// [`NotificationDispatcher::subscribe`]).
pub trait NotificationListener: Send + Sync {
    /// Unique among registered listeners; used to route retries.
    fn name(&self) -> &str;

    fn deliver(&self, notification: &Notification) -> Result<()>;

    /// A closed listener is unregistered on the next emit.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Forwards notifications into a bounded tokio channel.
pub struct ChannelListener {
    name: String,
    tx: mpsc::Sender<Notification>,
}

impl NotificationListener for ChannelListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, notification: &Notification) -> Result<()> {
        self.tx.try_send(notification.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::Other(format!("subscriber {} is full", self.name))
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::Other(format!("subscriber {} is closed", self.name))
            }
        })
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Where a queued delivery is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Listener(String),
    External,
}

impl Target {
    fn label(&self) -> &str {
        match self {
            Target::Listener(name) => name,
            Target::External => "external",
        }
    }
}

#[derive(Debug, Clone)]
struct PendingDelivery {
    notification: Notification,
    target: Target,
    attempts: u32,
}

pub struct NotificationDispatcher {
    log: RwLock<Vec<Notification>>,
    listeners: RwLock<Vec<Arc<dyn NotificationListener>>>,
    /// Serializes append + fan-out so listeners see log order.
    emit_order: Mutex<()>,
    retries: Mutex<VecDeque<PendingDelivery>>,
    outbox: Mutex<VecDeque<PendingDelivery>>,
    max_attempts: u32,
}

impl NotificationDispatcher {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            log: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            emit_order: Mutex::new(()),
            retries: Mutex::new(VecDeque::new()),
            outbox: Mutex::new(VecDeque::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a listener. A listener with the same name is replaced.
    pub fn register(&self, listener: Arc<dyn NotificationListener>) {
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.name() != listener.name());
        listeners.push(listener);
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.name() != name);
        listeners.len() != before
    }

    /// Subscribe through a channel. Dropping the receiver unsubscribes.
    pub fn subscribe(&self, name: impl Into<String>) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.register(Arc::new(ChannelListener {
            name: name.into(),
            tx,
        }));
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    // -----------------------------------------------------------------------
    // Emission
    // -----------------------------------------------------------------------

    /// Append a notification and fan it out. Returns the stored record.
    ///
    /// The append always succeeds; listener failures are queued for retry.
    pub fn emit(
        &self,
        timestamp: DateTime<Utc>,
        case_id: CaseId,
        stage: Option<StageId>,
        severity: Severity,
        kind: NotificationKind,
    ) -> Notification {
        let _order = self.emit_order.lock();

        let notification = {
            let mut log = self.log.write();
            let notification = Notification {
                id: NotificationId::new(),
                seq: log.len() as u64 + 1,
                timestamp,
                case_id,
                stage,
                severity,
                read: false,
                kind,
            };
            log.push(notification.clone());
            notification
        };

        metrics::notifications_emitted()
            .add(1, &[KeyValue::new("kind", notification.kind.name())]);
        tracing::debug!(
            seq = notification.seq,
            case = %notification.case_id,
            kind = notification.kind.name(),
            "notification emitted"
        );

        self.listeners.write().retain(|l| !l.is_closed());
        let listeners: Vec<_> = self.listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.deliver(&notification) {
                self.record_failure(PendingDelivery {
                    notification: notification.clone(),
                    target: Target::Listener(listener.name().to_string()),
                    attempts: 1,
                }, &e);
            }
        }

        self.outbox.lock().push_back(PendingDelivery {
            notification: notification.clone(),
            target: Target::External,
            attempts: 0,
        });

        notification
    }

    /// Queue a failed delivery for retry, or drop it once out of attempts.
    fn record_failure(&self, delivery: PendingDelivery, error: &Error) {
        let target = delivery.target.label().to_string();
        if delivery.attempts >= self.max_attempts {
            tracing::warn!(
                seq = delivery.notification.seq,
                target = %target,
                attempts = delivery.attempts,
                error = %error,
                "notification delivery abandoned"
            );
            metrics::delivery_failures().add(
                1,
                &[KeyValue::new("target", target), KeyValue::new("outcome", "dropped")],
            );
            return;
        }

        tracing::warn!(
            seq = delivery.notification.seq,
            target = %target,
            attempts = delivery.attempts,
            error = %error,
            "notification delivery failed, will retry"
        );
        metrics::delivery_failures().add(
            1,
            &[KeyValue::new("target", target), KeyValue::new("outcome", "retry")],
        );
        match delivery.target {
            Target::External => self.outbox.lock().push_back(delivery),
            Target::Listener(_) => self.retries.lock().push_back(delivery),
        }
    }

    /// Retry failed listener deliveries once each. Returns how many
    /// succeeded. Deliveries for listeners that have gone away are dropped.
    pub fn retry_failed(&self) -> usize {
        let pending: Vec<_> = self.retries.lock().drain(..).collect();
        let listeners: Vec<_> = self.listeners.read().clone();
        let mut delivered = 0;

        for mut delivery in pending {
            let Target::Listener(ref name) = delivery.target else {
                continue;
            };
            let Some(listener) = listeners.iter().find(|l| l.name() == name.as_str()) else {
                tracing::debug!(listener = %name, "dropping retry for unregistered listener");
                continue;
            };
            delivery.attempts += 1;
            match listener.deliver(&delivery.notification) {
                Ok(()) => delivered += 1,
                Err(e) => self.record_failure(delivery, &e),
            }
        }
        delivered
    }

    /// Forward queued notifications to the external sink, oldest first.
    /// Each call is bounded by `timeout`. Returns how many were accepted.
    pub async fn drain_outbox(&self, repository: &dyn CaseRepository, timeout: Duration) -> usize {
        let batch: Vec<_> = self.outbox.lock().drain(..).collect();
        let mut delivered = 0;

        for mut delivery in batch {
            delivery.attempts += 1;
            let result =
                match tokio::time::timeout(timeout, repository.notify_external(&delivery.notification))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::CollaboratorTimeout {
                        operation: "notify_external",
                    }),
                };
            match result {
                Ok(()) => delivered += 1,
                Err(e) => self.record_failure(delivery, &e),
            }
        }
        delivered
    }

    // -----------------------------------------------------------------------
    // Log queries
    // -----------------------------------------------------------------------

    /// Every notification, in emission order.
    pub fn all(&self) -> Vec<Notification> {
        self.log.read().clone()
    }

    /// Notifications with `seq` strictly greater than `seq`.
    pub fn since(&self, seq: u64) -> Vec<Notification> {
        // seq n lives at index n - 1
        let log = self.log.read();
        let start = (seq as usize).min(log.len());
        log[start..].to_vec()
    }

    pub fn for_stage(&self, stage: &StageId) -> Vec<Notification> {
        self.log
            .read()
            .iter()
            .filter(|n| n.stage.as_ref() == Some(stage))
            .cloned()
            .collect()
    }

    pub fn for_case(&self, case_id: CaseId) -> Vec<Notification> {
        self.log
            .read()
            .iter()
            .filter(|n| n.case_id == case_id)
            .cloned()
            .collect()
    }

    /// Unread notifications, optionally limited to one stage.
    pub fn unread_count(&self, stage: Option<&StageId>) -> usize {
        self.log
            .read()
            .iter()
            .filter(|n| !n.read)
            .filter(|n| stage.is_none() || n.stage.as_ref() == stage)
            .count()
    }

    /// Flip the read flag. The only mutation a stored notification allows.
    pub fn mark_read(&self, id: NotificationId) -> bool {
        let mut log = self.log.write();
        match log.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    /// Mark everything addressed to `stage` read. Returns how many changed.
    pub fn mark_stage_read(&self, stage: &StageId) -> usize {
        let mut log = self.log.write();
        let mut changed = 0;
        for n in log.iter_mut().filter(|n| !n.read && n.stage.as_ref() == Some(stage)) {
            n.read = true;
            changed += 1;
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.read().is_empty()
    }

    /// Listener deliveries waiting for retry.
    pub fn pending_retries(&self) -> usize {
        self.retries.lock().len()
    }

    /// Notifications not yet accepted by the external sink.
    pub fn outbox_len(&self) -> usize {
        self.outbox.lock().len()
    }
}
