//! Fire-and-forget work started by the router, and the analysing join.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use futures::future::join_all;
use shared::domain::InstrumentId;
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{sleep_until, timeout, Instant},
};
use tracing::{debug, warn};

use crate::error::BackgroundTaskError;

/// Handles of calls a flow's analysing stage waits on. Handles are only ever
/// dropped, never aborted, so the calls always run to completion.
#[derive(Default)]
pub struct BackgroundTasks {
    pending: HashMap<InstrumentId, Vec<JoinHandle<()>>>,
    detached: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `fut` detached. Failures are logged as [`BackgroundTaskError`]
    /// and go nowhere else. Returns `false` when no runtime is available.
    pub fn spawn_logged<F>(&self, task: &'static str, instrument: Option<InstrumentId>, fut: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let Some(handle) = spawn(task, instrument, fut) else {
            return false;
        };
        let mut detached = self.detached.lock().unwrap_or_else(PoisonError::into_inner);
        detached.retain(|handle| !handle.is_finished());
        detached.push(handle);
        true
    }

    /// Like [`BackgroundTasks::spawn_logged`], but the flow's analysing
    /// stage will wait for it.
    pub fn spawn_for_flow<F>(&mut self, task: &'static str, instrument: InstrumentId, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if let Some(handle) = spawn(task, Some(instrument), fut) {
            let handles = self.pending.entry(instrument).or_default();
            handles.retain(|handle| !handle.is_finished());
            handles.push(handle);
        }
    }

    pub fn pending(&self, instrument: InstrumentId) -> usize {
        self.pending
            .get(&instrument)
            .map_or(0, |handles| handles.iter().filter(|h| !h.is_finished()).count())
    }

    pub fn take(&mut self, instrument: InstrumentId) -> Vec<JoinHandle<()>> {
        self.pending.remove(&instrument).unwrap_or_default()
    }

    /// Every unfinished handle, flow-bound and detached alike.
    pub fn drain(&mut self) -> Vec<JoinHandle<()>> {
        let detached = std::mem::take(
            self.detached
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        self.pending
            .drain()
            .flat_map(|(_, handles)| handles)
            .chain(detached)
            .filter(|handle| !handle.is_finished())
            .collect()
    }
}

fn spawn<F>(task: &'static str, instrument: Option<InstrumentId>, fut: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let Ok(runtime) = Handle::try_current() else {
        warn!(task, "background: no runtime available, call skipped");
        return None;
    };
    Some(runtime.spawn(async move {
        match fut.await {
            Ok(()) => debug!(task, "background: task finished"),
            Err(source) => {
                let err = BackgroundTaskError {
                    task,
                    instrument,
                    source,
                };
                warn!(error = %err, "background: task failed");
            }
        }
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub settled: usize,
    /// Background calls were still running when the cap expired.
    pub timed_out: bool,
}

/// Waits for the dwell deadline and for `handles`, the latter at most
/// `max_wait`. Advancement never depends on whether the calls succeeded.
pub async fn analysing_join(
    handles: Vec<JoinHandle<()>>,
    dwell_until: Instant,
    max_wait: Duration,
) -> JoinOutcome {
    let total = handles.len();
    let background = timeout(max_wait, join_all(handles));
    let ((), joined) = tokio::join!(sleep_until(dwell_until), background);

    match joined {
        Ok(results) => {
            for err in results.into_iter().filter_map(Result::err) {
                warn!(error = %err, "background: task did not finish cleanly");
            }
            JoinOutcome {
                settled: total,
                timed_out: false,
            }
        }
        Err(_) => {
            warn!(
                pending = total,
                max_wait_ms = max_wait.as_millis() as u64,
                "background: calls still running, advancing without them"
            );
            JoinOutcome {
                settled: 0,
                timed_out: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use anyhow::anyhow;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn join_waits_for_the_dwell_even_when_calls_are_fast() {
        let mut tasks = BackgroundTasks::new();
        tasks.spawn_for_flow("contact_submission", InstrumentId::Aura, async { anyhow::Ok(()) });

        let started = Instant::now();
        let outcome = analysing_join(
            tasks.take(InstrumentId::Aura),
            started + Duration::from_millis(3500),
            Duration::from_secs(8),
        )
        .await;

        assert!(!outcome.timed_out);
        assert_eq!(outcome.settled, 1);
        assert!(started.elapsed() >= Duration::from_millis(3500));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn join_waits_for_the_slowest_call_within_the_cap() {
        let mut tasks = BackgroundTasks::new();
        tasks.spawn_for_flow("results_log", InstrumentId::Aura, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            anyhow::Ok(())
        });

        let started = Instant::now();
        let outcome = analysing_join(
            tasks.take(InstrumentId::Aura),
            started + Duration::from_millis(3500),
            Duration::from_secs(8),
        )
        .await;

        assert!(!outcome.timed_out);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_are_capped_but_not_cancelled() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let mut tasks = BackgroundTasks::new();
        tasks.spawn_for_flow("contact_submission", InstrumentId::Aura, async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            flag.store(true, Ordering::SeqCst);
            anyhow::Ok(())
        });

        let started = Instant::now();
        let outcome = analysing_join(
            tasks.take(InstrumentId::Aura),
            started + Duration::from_millis(3500),
            Duration::from_secs(8),
        )
        .await;
        assert!(outcome.timed_out);
        assert!(started.elapsed() < Duration::from_secs(9));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_calls_never_block_the_join() {
        let mut tasks = BackgroundTasks::new();
        tasks.spawn_for_flow("contact_submission", InstrumentId::Gbsi, async {
            Err::<(), _>(anyhow!("sink unreachable"))
        });

        let started = Instant::now();
        let outcome =
            analysing_join(tasks.take(InstrumentId::Gbsi), started, Duration::from_secs(8)).await;
        assert!(!outcome.timed_out);
        assert_eq!(tasks.pending(InstrumentId::Gbsi), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_collects_detached_and_flow_calls() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let mut tasks = BackgroundTasks::new();
        tasks.spawn_for_flow("results_log", InstrumentId::Atm, async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            anyhow::Ok(())
        });
        assert!(tasks.spawn_logged("analytics", None, async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            flag.store(true, Ordering::SeqCst);
            anyhow::Ok(())
        }));

        let handles = tasks.drain();
        assert_eq!(handles.len(), 2);
        assert_eq!(tasks.pending(InstrumentId::Atm), 0);
        let outcome = analysing_join(handles, Instant::now(), Duration::from_secs(8)).await;
        assert!(!outcome.timed_out);
        assert!(finished.load(Ordering::SeqCst));
        assert!(tasks.drain().is_empty());
    }

    #[test]
    fn spawning_without_a_runtime_is_skipped() {
        let tasks = BackgroundTasks::new();
        assert!(!tasks.spawn_logged("analytics", None, async { anyhow::Ok(()) }));
    }
}
