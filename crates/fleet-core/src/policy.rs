// # Policy Notifier
//
// Fire-and-forget delivery of provision/revoke commands to the network
// policy service.
//
// Callers enqueue and move on; enqueue never blocks and never fails. A
// single worker drains the queue in order, bounding each call with a
// timeout and retrying a command up to `max_attempts` times before giving
// up on it. Both policy operations are idempotent, so a retried command
// that already took effect is harmless.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PolicyConfig;
use crate::model::DeviceId;
use crate::traits::PolicyService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyCommand {
    Provision(DeviceId),
    Revoke(DeviceId),
}

impl PolicyCommand {
    fn device_id(&self) -> &DeviceId {
        match self {
            Self::Provision(id) | Self::Revoke(id) => id,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Self::Provision(_) => "provision",
            Self::Revoke(_) => "revoke",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    abandoned: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyStats {
    pub delivered: u64,
    /// Gave up after `max_attempts`
    pub abandoned: u64,
    /// Queue full or already shut down
    pub dropped: u64,
}

pub struct PolicyNotifier {
    tx: Mutex<Option<mpsc::Sender<PolicyCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl PolicyNotifier {
    /// Spawn the delivery worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(service: Arc<dyn PolicyService>, config: &PolicyConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(deliver(
            service,
            rx,
            Duration::from_secs(config.timeout_secs),
            config.max_attempts.max(1),
            Duration::from_secs(config.retry_delay_secs),
            counters.clone(),
        ));

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            counters,
        }
    }

    pub fn provision(&self, device_id: &DeviceId) {
        self.enqueue(PolicyCommand::Provision(device_id.clone()));
    }

    pub fn revoke(&self, device_id: &DeviceId) {
        self.enqueue(PolicyCommand::Revoke(device_id.clone()));
    }

    pub fn enqueue(&self, command: PolicyCommand) {
        let guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Policy notifier is shut down; dropping {} for {}",
                command.verb(),
                command.device_id()
            );
            return;
        };

        if let Err(e) = tx.try_send(command) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            let command = match e {
                mpsc::error::TrySendError::Full(c) | mpsc::error::TrySendError::Closed(c) => c,
            };
            warn!(
                "Policy queue full; dropping {} for {}",
                command.verb(),
                command.device_id()
            );
        }
    }

    pub fn stats(&self) -> PolicyStats {
        PolicyStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Close the queue and wait for the worker to drain what is left
    pub async fn shutdown(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Policy worker ended abnormally: {}", e);
            }
            info!("Policy notifier drained");
        }
    }
}

async fn deliver(
    service: Arc<dyn PolicyService>,
    mut rx: mpsc::Receiver<PolicyCommand>,
    timeout: Duration,
    max_attempts: usize,
    retry_delay: Duration,
    counters: Arc<Counters>,
) {
    while let Some(command) = rx.recv().await {
        let mut attempt = 1;
        loop {
            let call = async {
                match &command {
                    PolicyCommand::Provision(id) => service.provision(id).await,
                    PolicyCommand::Revoke(id) => service.revoke(id).await,
                }
            };
            let outcome = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(crate::Error::timeout(format!(
                    "{} {} after {:?}",
                    service.service_name(),
                    command.verb(),
                    timeout
                ))),
            };

            match outcome {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!("Policy {} delivered for {}", command.verb(), command.device_id());
                    break;
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "Policy {} attempt {} for {} failed: {}",
                        command.verb(),
                        attempt,
                        command.device_id(),
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(retry_delay).await;
                }
                Err(e) => {
                    counters.abandoned.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "Giving up on policy {} for {} after {} attempts: {}",
                        command.verb(),
                        command.device_id(),
                        attempt,
                        e
                    );
                    break;
                }
            }
        }
    }
    debug!("Policy queue closed");
}
