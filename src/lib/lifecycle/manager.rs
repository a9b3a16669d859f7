use std::sync::Arc;

use tokio::{sync::watch, time::Instant};
use tracing::*;

use crate::backend::MediaBackend;

use super::{
    cycle::Cycle,
    types::{
        CycleConfig, CycleOutcome, CycleReport, FaultPolicy, LifecycleConfig, RunSummary,
        StopReason,
    },
};

/// Runs cycles one after the other and decides, after each one, whether to go on.
#[derive(Debug)]
pub struct LifecycleManager<B: MediaBackend> {
    backend: Arc<B>,
    config: LifecycleConfig,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl<B: MediaBackend> LifecycleManager<B> {
    pub fn new(backend: Arc<B>, config: LifecycleConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);

        Self {
            backend,
            config,
            stop_tx: Arc::new(stop_tx),
        }
    }

    /// A handle to ask the manager to stop: the running cycle ends normally and no further
    /// cycle is started.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Run `cycle_count` cycles of `cycle_config`, strictly one after the other.
    #[instrument(level = "debug", skip(self, cycle_config), fields(name = %cycle_config.name))]
    pub async fn run(&self, cycle_count: usize, cycle_config: &CycleConfig) -> RunSummary {
        let mut stop = self.stop_tx.subscribe();
        let mut summary = RunSummary {
            requested: cycle_count,
            ..Default::default()
        };

        for index in 0..cycle_count {
            if *stop.borrow_and_update() {
                info!("Stop requested, not starting cycle {index}");
                summary.stopped = true;
                break;
            }

            info!("Build pipeline (iteration {index})");

            let started = Instant::now();
            let mut cycle = Cycle::new(self.backend.clone(), index, cycle_config.clone());
            let outcome = cycle.execute(&self.config, &mut stop).await;
            let states = cycle.states().to_vec();
            drop(cycle);

            let elapsed_ms = started.elapsed().as_millis() as u64;
            if outcome.is_success() {
                info!("Cycle {index} finished with {outcome} after {elapsed_ms} ms");
            } else {
                error!("Cycle {index} failed with {outcome} after {elapsed_ms} ms");
            }

            let fault = outcome.is_fault();
            let rejected = outcome.is_rejected();
            let stop_requested = matches!(
                outcome,
                CycleOutcome::Success {
                    reason: StopReason::StopRequested
                }
            );

            summary.completed += 1;
            summary.cycles.push(CycleReport {
                index,
                outcome,
                states,
                elapsed_ms,
            });

            // The same configuration would be refused again on every cycle
            if rejected {
                error!("Halting after cycle {index} was rejected");
                summary.halted = index + 1 < cycle_count;
                break;
            }

            if fault && self.config.fault_policy == FaultPolicy::Halt {
                error!("Halting after a fault in cycle {index}");
                summary.halted = index + 1 < cycle_count;
                break;
            }

            if stop_requested {
                summary.stopped = index + 1 < cycle_count;
                break;
            }
        }

        info!(
            "Ran {} of {} cycles: {} succeeded, {} faulted, {} rejected",
            summary.completed,
            summary.requested,
            summary.successes(),
            summary.faults(),
            summary.rejections()
        );

        summary
    }
}

#[derive(Clone, Debug)]
pub struct StopHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
