use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Orchestrator, PassReport, Trigger};
use crate::errors::TriggerError;

const MIN_PERIOD: Duration = Duration::from_secs(1);

type Reply = oneshot::Sender<Result<PassReport, TriggerError>>;

pub struct SchedulerHandle {
    triggers: mpsc::Sender<Reply>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Starts the periodic loop. The first pass begins immediately.
pub fn spawn_scheduler(orchestrator: Arc<Orchestrator>) -> SchedulerHandle {
    let (triggers, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_loop(orchestrator, rx, cancel.clone()));
    SchedulerHandle {
        triggers,
        cancel,
        task: Mutex::new(Some(task)),
    }
}

impl SchedulerHandle {
    /// Requests a pass out of band and waits for its report.
    pub async fn run_now(&self) -> Result<PassReport, TriggerError> {
        let (reply, rx) = oneshot::channel();
        self.triggers
            .send(reply)
            .await
            .map_err(|_| TriggerError::Stopped)?;
        rx.await.map_err(|_| TriggerError::Stopped)?
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops ticking and waits up to the plan's grace period for an in-flight pass.
    /// Later calls return immediately.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().expect("scheduler lock poisoned").take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "backup scheduler task failed");
            }
        }
    }
}

async fn run_loop(
    orchestrator: Arc<Orchestrator>,
    mut triggers: mpsc::Receiver<Reply>,
    cancel: CancellationToken,
) {
    let period = orchestrator.plan().period.max(MIN_PERIOD);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    info!(period_secs = period.as_secs(), "backup scheduler started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Some(handle) = start_pass(&orchestrator, Trigger::Schedule, None) {
                    in_flight = Some(handle);
                }
            }
            reply = triggers.recv() => match reply {
                Some(reply) => {
                    if let Some(handle) = start_pass(&orchestrator, Trigger::Manual, Some(reply)) {
                        in_flight = Some(handle);
                    }
                }
                None => break,
            },
        }
    }

    if let Some(mut handle) = in_flight.filter(|handle| !handle.is_finished()) {
        let grace = orchestrator.plan().shutdown_grace;
        info!(grace_secs = grace.as_secs(), "waiting for in-flight backup pass");
        if timeout(grace, &mut handle).await.is_err() {
            warn!("backup pass did not finish within grace period; aborting");
            handle.abort();
            let _ = handle.await;
            orchestrator.remove_scratch().await;
        }
    }
    info!("backup scheduler stopped");
}

fn start_pass(
    orchestrator: &Arc<Orchestrator>,
    trigger: Trigger,
    reply: Option<Reply>,
) -> Option<JoinHandle<()>> {
    let Some(permit) = orchestrator.try_begin() else {
        info!(%trigger, "backup pass already running; trigger dropped");
        if let Some(reply) = reply {
            let _ = reply.send(Err(TriggerError::AlreadyRunning));
        }
        return None;
    };

    let orchestrator = Arc::clone(orchestrator);
    Some(tokio::spawn(async move {
        let report = orchestrator.run_pass(permit, trigger).await;
        if let Some(reply) = reply {
            let _ = reply.send(Ok(report));
        }
    }))
}
