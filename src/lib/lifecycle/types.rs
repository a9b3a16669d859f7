use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graph::{error::GraphError, types::StageSpec};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleState {
    Idle,
    Building,
    Linking,
    Running,
    Stopping,
    Dismantled,
}

/// Why a cycle that ran without faults stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The run duration elapsed after the pipeline started playing
    Timeout,
    /// Someone asked the driver to stop
    StopRequested,
    EndOfStream,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum CycleOutcome {
    Success {
        reason: StopReason,
    },
    ConstructionError {
        stage_index: Option<usize>,
        factory: String,
        reason: String,
    },
    LinkError {
        from: String,
        to: String,
    },
    Fault {
        source: String,
        detail: String,
    },
    /// The cycle was refused before running: bad configuration or misuse of a handle
    Rejected {
        reason: String,
    },
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Success { .. })
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, CycleOutcome::Fault { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, CycleOutcome::Rejected { .. })
    }
}

impl From<GraphError> for CycleOutcome {
    fn from(error: GraphError) -> Self {
        match error {
            GraphError::Construction {
                stage_index,
                factory,
                reason,
            } => CycleOutcome::ConstructionError {
                stage_index,
                factory,
                reason,
            },
            GraphError::Link { from, to } => CycleOutcome::LinkError { from, to },
            error @ (GraphError::InvalidHandle(_)
            | GraphError::OutOfOrder { .. }
            | GraphError::Configuration(_)) => CycleOutcome::Rejected {
                reason: error.to_string(),
            },
        }
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleOutcome::Success { reason } => write!(f, "success ({reason:?})"),
            CycleOutcome::ConstructionError {
                stage_index: Some(stage_index),
                factory,
                reason,
            } => write!(
                f,
                "construction-error at stage {stage_index} ({factory}): {reason}"
            ),
            CycleOutcome::ConstructionError {
                stage_index: None,
                factory,
                reason,
            } => write!(f, "construction-error ({factory}): {reason}"),
            CycleOutcome::LinkError { from, to } => write!(f, "link-error {from} -> {to}"),
            CycleOutcome::Fault { source, detail } => write!(f, "fault from {source}: {detail}"),
            CycleOutcome::Rejected { reason } => write!(f, "rejected: {reason}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub index: usize,
    #[serde(flatten)]
    pub outcome: CycleOutcome,
    /// Every state the cycle went through, in order
    pub states: Vec<CycleState>,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub requested: usize,
    pub completed: usize,
    /// A fault or a rejected cycle stopped the driver before all cycles ran
    pub halted: bool,
    /// A stop request stopped the driver before all cycles ran
    pub stopped: bool,
    pub cycles: Vec<CycleReport>,
}

impl RunSummary {
    pub fn successes(&self) -> usize {
        self.cycles
            .iter()
            .filter(|cycle| cycle.outcome.is_success())
            .count()
    }

    pub fn faults(&self) -> usize {
        self.cycles
            .iter()
            .filter(|cycle| cycle.outcome.is_fault())
            .count()
    }

    pub fn rejections(&self) -> usize {
        self.cycles
            .iter()
            .filter(|cycle| cycle.outcome.is_rejected())
            .count()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultPolicy {
    /// Stop issuing cycles after the first fault
    #[default]
    Halt,
    Continue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub fault_policy: FaultPolicy,
    /// How long the pipeline has to reach Playing after being activated
    pub activation_timeout: Duration,
    /// Log the RTP session statistics this often while running
    pub stats_interval: Option<Duration>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            fault_policy: FaultPolicy::default(),
            activation_timeout: Duration::from_secs(10),
            stats_interval: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub host: String,
    pub data_port: u16,
}

/// Everything needed to build one cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    pub name: String,
    pub stages: Vec<StageSpec>,
    pub transport: TransportConfig,
    pub run_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eos_after_buffers: Option<u64>,
}

impl CycleConfig {
    pub fn run_duration(&self) -> Duration {
        Duration::from_millis(self.run_duration_ms)
    }
}
