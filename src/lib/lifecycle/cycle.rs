use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::Instant};
use tracing::*;

use crate::{
    backend::{ElementState, MediaBackend, Notification, NotificationReceiver},
    graph::{
        error::{GraphError, Result},
        session_sink::SessionSink,
        sub_graph::SubGraph,
        types::{ConnectionPoint, TransportPorts, TransportTarget},
    },
};

use super::types::{CycleConfig, CycleOutcome, CycleState, LifecycleConfig, StopReason};

/// One build/run/teardown iteration.
///
/// A Cycle owns everything it creates: the pipeline, the Sub-Graph, the Session Sink, the
/// connection points and the links between them. Nothing outlives it: dropping a Cycle tears it
/// all down in reverse order of creation, whatever state it was left in.
#[derive(Debug)]
pub struct Cycle<B: MediaBackend> {
    backend: Arc<B>,
    index: usize,
    config: CycleConfig,
    state: CycleState,
    states: Vec<CycleState>,
    pipeline: Option<B::Element>,
    pipeline_name: String,
    sub_graph: Option<SubGraph<B>>,
    session_sink: Option<SessionSink<B>>,
    points: Vec<ConnectionPoint>,
    /// Links made by the Cycle itself, as (src, sink)
    connections: Vec<(B::Pad, B::Pad)>,
    notifications: Option<NotificationReceiver>,
    active: bool,
}

impl<B: MediaBackend> Cycle<B> {
    pub fn new(backend: Arc<B>, index: usize, config: CycleConfig) -> Self {
        let pipeline_name = format!("{}-{index}", config.name);

        Self {
            backend,
            index,
            config,
            state: CycleState::Idle,
            states: vec![CycleState::Idle],
            pipeline: None,
            pipeline_name,
            sub_graph: None,
            session_sink: None,
            points: Vec::new(),
            connections: Vec::new(),
            notifications: None,
            active: false,
        }
    }

    /// Run the whole cycle: build, link, run until a stop condition, stop and dismantle.
    #[instrument(level = "debug", skip_all, fields(cycle = self.index))]
    pub async fn execute(
        &mut self,
        lifecycle: &LifecycleConfig,
        stop: &mut watch::Receiver<bool>,
    ) -> CycleOutcome {
        if let Err(error) = timers(lifecycle) {
            error!("Cycle {} refused: {error}", self.index);
            self.dismantle();
            return error.into();
        }

        if let Err(error) = self.build() {
            error!("Cycle {} failed building: {error}", self.index);
            self.dismantle();
            return error.into();
        }

        if let Err(error) = self.link() {
            error!("Cycle {} failed linking: {error}", self.index);
            self.dismantle();
            return error.into();
        }

        let outcome = self.run(lifecycle, stop).await;

        self.stop();
        self.dismantle();

        outcome
    }

    /// Create the pipeline, the Sub-Graph and the Session Sink.
    #[instrument(level = "debug", skip(self), fields(cycle = self.index))]
    pub fn build(&mut self) -> Result<()> {
        self.expect_state("build", CycleState::Idle)?;
        self.enter(CycleState::Building);

        self.ports()?;
        deadline_after("Run duration", self.config.run_duration())?;
        if self.config.eos_after_buffers == Some(0) {
            return Err(GraphError::Configuration(
                "End of stream needs at least one buffer".to_string(),
            ));
        }

        let pipeline = self
            .backend
            .new_pipeline(&self.pipeline_name)
            .map_err(|error| GraphError::construction(None, "pipeline", format!("{error:#}")))?;
        self.pipeline = Some(pipeline.clone());

        self.sub_graph = Some(SubGraph::build(
            self.backend.clone(),
            &format!("{}-sub-graph", self.pipeline_name),
            &self.config.stages,
        )?);

        self.session_sink = Some(SessionSink::create(self.backend.clone(), &pipeline)?);

        Ok(())
    }

    /// Link the Sub-Graph, insert it, request the session channels and connect them.
    #[instrument(level = "debug", skip(self), fields(cycle = self.index))]
    pub fn link(&mut self) -> Result<()> {
        self.expect_state("link", CycleState::Building)?;
        self.enter(CycleState::Linking);

        let ports = self.ports()?;
        let host = self.config.transport.host.clone();
        let pipeline = self.pipeline()?.clone();

        let (Some(sub_graph), Some(session_sink)) =
            (self.sub_graph.as_mut(), self.session_sink.as_mut())
        else {
            return Err(GraphError::InvalidHandle(format!(
                "Cycle {} was not built",
                self.index
            )));
        };

        sub_graph.link_internal()?;
        let boundary = sub_graph.expose_boundary()?;
        sub_graph.insert_into(&pipeline)?;

        let data = session_sink.request_data_channel(&TransportTarget::new(&host, ports.data))?;
        self.points.push(data);

        let feedback_out = session_sink
            .request_feedback_out(data.session, &TransportTarget::new(&host, ports.feedback_out))?;
        self.points.push(feedback_out);

        let feedback_in = session_sink.request_feedback_in(data.session, ports.feedback_in)?;
        self.points.push(feedback_in);

        let data_pad = session_sink.pad(&data)?.clone();
        self.backend
            .link_pads(&boundary.output, &data_pad)
            .map_err(|error| {
                warn!("Failed connecting Sub-Graph to the Session Sink: {error:#}");
                GraphError::link(
                    self.backend.pad_name(&boundary.output),
                    self.backend.pad_name(&data_pad),
                )
            })?;
        self.connections.push((boundary.output.clone(), data_pad));

        if let Some(buffers) = self.config.eos_after_buffers {
            self.backend
                .end_stream_after(&pipeline, &boundary.output, buffers)
                .map_err(|error| {
                    GraphError::construction(None, "end-of-stream probe", format!("{error:#}"))
                })?;
        }

        debug!(
            "Cycle {} linked with {} connection points to {host} (ports {ports:?})",
            self.index,
            self.points.len()
        );

        Ok(())
    }

    /// Activate the pipeline and wait, in order of arrival, for the first stop condition.
    #[instrument(level = "debug", skip_all, fields(cycle = self.index))]
    pub async fn run(
        &mut self,
        lifecycle: &LifecycleConfig,
        stop: &mut watch::Receiver<bool>,
    ) -> CycleOutcome {
        if let Err(error) = self.expect_state("run", CycleState::Linking) {
            return error.into();
        }
        self.enter(CycleState::Running);

        let pipeline = match self.pipeline() {
            Ok(pipeline) => pipeline.clone(),
            Err(error) => return error.into(),
        };

        let (activation_deadline, mut stats_interval) = match timers(lifecycle) {
            Ok(timers) => timers,
            Err(error) => {
                error!("Cycle {} cannot run: {error}", self.index);
                return error.into();
            }
        };

        let mut notifications = match self.backend.subscribe(&pipeline) {
            Ok(notifications) => notifications,
            Err(error) => {
                return self.fault(format!("Failed subscribing to notifications: {error:#}"))
            }
        };

        if *stop.borrow_and_update() {
            return CycleOutcome::Success {
                reason: StopReason::StopRequested,
            };
        }

        if let Err(error) = self.backend.activate(&pipeline) {
            error!("Failed activating pipeline {:?}: {error:#}", self.pipeline_name);
            return self.fault(format!("{error:#}"));
        }
        self.active = true;
        if let Some(sub_graph) = self.sub_graph.as_mut() {
            sub_graph.activate();
        }

        let mut stop_at: Option<Instant> = None;
        let mut listen_to_stop = true;

        let outcome = loop {
            tokio::select! {
                biased;

                notification = notifications.recv() => {
                    let Some(notification) = notification else {
                        break self.fault("Notification channel closed".to_string());
                    };

                    match notification {
                        Notification::Fault { source, detail, debug: debug_info } => {
                            error!("Error from {source}: {detail} ({debug_info:?})");
                            self.backend.snapshot(&pipeline, "error");
                            break CycleOutcome::Fault { source, detail };
                        }
                        Notification::EndOfStream { source } => {
                            info!("End of stream from {source}");
                            break CycleOutcome::Success {
                                reason: StopReason::EndOfStream,
                            };
                        }
                        Notification::StateChanged { source, from_root, old, new, pending } => {
                            trace!("{source} changed state from {old:?} to {new:?} ({pending:?})");

                            if from_root && new == ElementState::Playing && stop_at.is_none() {
                                info!(
                                    "Pipeline {:?} is playing, stopping in {:?}",
                                    self.pipeline_name,
                                    self.config.run_duration()
                                );
                                self.backend.snapshot(&pipeline, "running-pipe");
                                match deadline_after("Run duration", self.config.run_duration()) {
                                    Ok(deadline) => stop_at = Some(deadline),
                                    Err(error) => break CycleOutcome::from(error),
                                }
                            }
                        }
                    }
                }
                changed = stop.changed(), if listen_to_stop => {
                    if changed.is_err() {
                        listen_to_stop = false;
                        continue;
                    }
                    if *stop.borrow_and_update() {
                        info!("Stop requested while running cycle {}", self.index);
                        break CycleOutcome::Success {
                            reason: StopReason::StopRequested,
                        };
                    }
                }
                _ = sleep_until_some(stop_at) => {
                    break CycleOutcome::Success {
                        reason: StopReason::Timeout,
                    };
                }
                _ = tokio::time::sleep_until(activation_deadline), if stop_at.is_none() => {
                    break self.fault(format!(
                        "Pipeline did not reach Playing within {:?}",
                        lifecycle.activation_timeout
                    ));
                }
                _ = tick_some(stats_interval.as_mut()) => {
                    self.log_session_stats();
                }
            }
        };

        self.notifications = Some(notifications);

        outcome
    }

    /// Bring the pipeline back down. Failures are only logged.
    #[instrument(level = "debug", skip(self), fields(cycle = self.index))]
    pub fn stop(&mut self) {
        self.enter(CycleState::Stopping);
        self.deactivate();
    }

    /// Tear everything down in reverse order of creation. Calling it again is a no-op.
    #[instrument(level = "debug", skip(self), fields(cycle = self.index))]
    pub fn dismantle(&mut self) {
        if self.state == CycleState::Dismantled {
            return;
        }

        if self.active {
            self.deactivate();
        }

        if let Some(pipeline) = &self.pipeline {
            self.backend.unsubscribe(pipeline);
        }
        self.notifications = None;

        for (src, sink) in self.connections.drain(..).rev() {
            if let Err(error) = self.backend.unlink_pads(&src, &sink) {
                warn!("Failed unlinking connection: {error:#}");
            }
        }

        if let Some(session_sink) = self.session_sink.as_mut() {
            for point in self.points.drain(..).rev() {
                if let Err(error) = session_sink.release(&point) {
                    error!("Failed releasing {point:?}: {error}");
                }
            }
        }
        self.points.clear();

        if let Some(mut sub_graph) = self.sub_graph.take() {
            if let Some(pipeline) = self.pipeline.as_ref().filter(|_| sub_graph.is_inserted()) {
                if let Err(error) = sub_graph.remove_from(pipeline) {
                    error!("Failed removing Sub-Graph: {error}");
                }
            }
            sub_graph.dismantle();
        }

        if let Some(mut session_sink) = self.session_sink.take() {
            session_sink.destroy();
        }

        if let Some(pipeline) = self.pipeline.take() {
            self.backend.destroy(pipeline);
        }

        self.enter(CycleState::Dismantled);
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn states(&self) -> &[CycleState] {
        &self.states
    }

    /// Connection points currently requested from the Session Sink
    pub fn outstanding_points(&self) -> usize {
        self.session_sink
            .as_ref()
            .map(|session_sink| session_sink.outstanding())
            .unwrap_or_default()
    }

    fn enter(&mut self, state: CycleState) {
        debug!("Cycle {}: {:?} -> {state:?}", self.index, self.state);
        self.state = state;
        self.states.push(state);
    }

    fn expect_state(&self, operation: &'static str, expected: CycleState) -> Result<()> {
        if self.state != expected {
            return Err(GraphError::InvalidHandle(format!(
                "Cycle {} cannot {operation} while {:?}",
                self.index, self.state
            )));
        }

        Ok(())
    }

    fn ports(&self) -> Result<TransportPorts> {
        TransportPorts::from_data_port(self.config.transport.data_port).ok_or_else(|| {
            GraphError::Configuration(format!(
                "Data port {} leaves no room for the RTCP ports",
                self.config.transport.data_port
            ))
        })
    }

    fn pipeline(&self) -> Result<&B::Element> {
        self.pipeline.as_ref().ok_or_else(|| {
            GraphError::InvalidHandle(format!("Cycle {} has no pipeline", self.index))
        })
    }

    fn fault(&self, detail: String) -> CycleOutcome {
        CycleOutcome::Fault {
            source: self.pipeline_name.clone(),
            detail,
        }
    }

    fn deactivate(&mut self) {
        if let Some(pipeline) = &self.pipeline {
            if let Err(error) = self.backend.deactivate(pipeline) {
                warn!("Failed deactivating pipeline {:?}: {error:#}", self.pipeline_name);
            }
        }
        if let Some(sub_graph) = self.sub_graph.as_mut() {
            sub_graph.deactivate();
        }
        self.active = false;
    }

    fn log_session_stats(&self) {
        let Some(session_sink) = &self.session_sink else {
            return;
        };

        for session in session_sink.sessions() {
            match session_sink.session_stats(session) {
                Some(stats) => info!("RTP session {session} stats: {stats}"),
                None => debug!("No stats for RTP session {session}"),
            }
        }
    }
}

impl<B: MediaBackend> Drop for Cycle<B> {
    fn drop(&mut self) {
        self.dismantle();
    }
}

fn deadline_after(what: &str, after: Duration) -> Result<Instant> {
    Instant::now().checked_add(after).ok_or_else(|| {
        GraphError::Configuration(format!("{what} of {after:?} is out of range"))
    })
}

/// The activation deadline and the optional stats ticker, both starting now.
fn timers(lifecycle: &LifecycleConfig) -> Result<(Instant, Option<tokio::time::Interval>)> {
    let activation_deadline = deadline_after("Activation timeout", lifecycle.activation_timeout)?;

    let stats_interval = match lifecycle.stats_interval {
        Some(period) if period.is_zero() => {
            return Err(GraphError::Configuration(
                "Stats interval must not be zero".to_string(),
            ))
        }
        Some(period) => {
            let start = deadline_after("Stats interval", period)?;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            Some(interval)
        }
        None => None,
    };

    Ok((activation_deadline, stats_interval))
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick_some(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
