use std::sync::Arc;

use tracing::*;

use crate::backend::MediaBackend;

use super::{
    error::{GraphError, Result},
    types::{StageSpec, StageState, SubGraphState},
};

pub const BOUNDARY_INPUT_NAME: &str = "sink";
pub const BOUNDARY_OUTPUT_NAME: &str = "src";

#[derive(Debug)]
pub struct Stage<B: MediaBackend> {
    pub index: usize,
    pub spec: StageSpec,
    pub element: B::Element,
    pub state: StageState,
}

/// Pass-through ports of a Sub-Graph, delegating to its first and last Stages.
///
/// The input is only published when the first Stage accepts input (a capture source does not).
#[derive(Clone, Debug)]
pub struct Boundary<P> {
    pub input: Option<P>,
    pub output: P,
}

/// An ordered chain of Stages living in its own container, inserted into and removed from a
/// parent pipeline as one unit.
///
/// Dropping a Sub-Graph dismantles it.
#[derive(Debug)]
pub struct SubGraph<B: MediaBackend> {
    backend: Arc<B>,
    name: String,
    bin: Option<B::Element>,
    stages: Vec<Stage<B>>,
    /// Number of internal links made, Stage `i` to `i + 1` for `i < internal_links`
    internal_links: usize,
    ghost_pads: Vec<B::Pad>,
    boundary: Option<Boundary<B::Pad>>,
    parent: Option<B::Element>,
    state: SubGraphState,
}

impl<B: MediaBackend> SubGraph<B> {
    /// Instantiate every Stage of `stage_specs`, in order, inside a new container.
    ///
    /// Fails on the first Stage that cannot be instantiated, leaving nothing behind.
    #[instrument(level = "debug", skip(backend, stage_specs), fields(stages = stage_specs.len()))]
    pub fn build(backend: Arc<B>, name: &str, stage_specs: &[StageSpec]) -> Result<Self> {
        if stage_specs.is_empty() {
            return Err(GraphError::construction(
                Some(0),
                name,
                "a Sub-Graph needs at least one Stage",
            ));
        }

        let bin = backend
            .new_bin(name)
            .map_err(|error| GraphError::construction(None, name, format!("{error:#}")))?;

        let mut sub_graph = Self {
            backend,
            name: name.to_string(),
            bin: Some(bin),
            stages: Vec::with_capacity(stage_specs.len()),
            internal_links: 0,
            ghost_pads: Vec::new(),
            boundary: None,
            parent: None,
            state: SubGraphState::Built,
        };

        for (index, spec) in stage_specs.iter().enumerate() {
            // On error, `sub_graph` is dropped here and removes what was already attached
            let element = sub_graph.backend.make_element(spec).map_err(|error| {
                error!("Failed instantiating Stage {index} ({spec}): {error:#}");
                GraphError::construction(Some(index), &spec.factory, format!("{error:#}"))
            })?;

            let bin = sub_graph.bin()?;
            if let Err(error) = sub_graph.backend.add(bin, &element) {
                sub_graph.backend.destroy(element);
                return Err(GraphError::construction(
                    Some(index),
                    &spec.factory,
                    format!("{error:#}"),
                ));
            }

            sub_graph.stages.push(Stage {
                index,
                spec: spec.clone(),
                element,
                state: StageState::Attached,
            });
        }

        debug!("Sub-Graph {name:?} built with {} Stages", sub_graph.stages.len());

        Ok(sub_graph)
    }

    /// Link every Stage output to the next Stage input, in order.
    ///
    /// On failure, every link made so far is undone before returning.
    #[instrument(level = "debug", skip(self), fields(sub_graph = %self.name))]
    pub fn link_internal(&mut self) -> Result<()> {
        self.expect_state("link_internal", SubGraphState::Built)?;

        if self.stages.is_empty() {
            return Err(GraphError::construction(
                Some(0),
                &self.name,
                "no Stages to link",
            ));
        }

        for index in 0..self.stages.len() - 1 {
            let src = &self.stages[index];
            let sink = &self.stages[index + 1];

            if let Err(error) = self.backend.link(&src.element, &sink.element) {
                let from = self.backend.element_name(&src.element);
                let to = self.backend.element_name(&sink.element);
                error!("Failed linking Stage {index} ({from}) to Stage {} ({to}): {error:#}", index + 1);

                self.unlink_internal();
                return Err(GraphError::link(from, to));
            }

            self.internal_links += 1;
        }

        self.state = SubGraphState::LinkedInternally;

        Ok(())
    }

    /// Publish the pass-through ports of this Sub-Graph.
    #[instrument(level = "debug", skip(self), fields(sub_graph = %self.name))]
    pub fn expose_boundary(&mut self) -> Result<Boundary<B::Pad>> {
        self.expect_state("expose_boundary", SubGraphState::LinkedInternally)?;

        let bin = self.bin()?.clone();
        let (Some(first), Some(last)) = (self.stages.first(), self.stages.last()) else {
            return Err(GraphError::construction(Some(0), &self.name, "no Stages"));
        };

        let output_target = self
            .backend
            .static_pad(&last.element, BOUNDARY_OUTPUT_NAME)
            .ok_or_else(|| {
                GraphError::link(
                    self.backend.element_name(&last.element),
                    format!("{}.{BOUNDARY_OUTPUT_NAME}", self.name),
                )
            })?;
        let input_target = self.backend.static_pad(&first.element, BOUNDARY_INPUT_NAME);

        let input = match input_target {
            Some(target) => {
                let pad = self
                    .backend
                    .add_ghost_pad(&bin, BOUNDARY_INPUT_NAME, &target)
                    .map_err(|error| {
                        warn!("Failed exposing input boundary: {error:#}");
                        GraphError::link(
                            format!("{}.{BOUNDARY_INPUT_NAME}", self.name),
                            self.backend.pad_name(&target),
                        )
                    })?;
                self.ghost_pads.push(pad.clone());
                Some(pad)
            }
            None => None,
        };

        let output = self
            .backend
            .add_ghost_pad(&bin, BOUNDARY_OUTPUT_NAME, &output_target)
            .map_err(|error| {
                warn!("Failed exposing output boundary: {error:#}");
                GraphError::link(
                    self.backend.pad_name(&output_target),
                    format!("{}.{BOUNDARY_OUTPUT_NAME}", self.name),
                )
            })?;
        self.ghost_pads.push(output.clone());

        let boundary = Boundary { input, output };
        self.boundary = Some(boundary.clone());
        self.state = SubGraphState::Exposed;

        Ok(boundary)
    }

    #[instrument(level = "debug", skip(self, parent), fields(sub_graph = %self.name))]
    pub fn insert_into(&mut self, parent: &B::Element) -> Result<()> {
        self.expect_state("insert_into", SubGraphState::Exposed)?;

        let bin = self.bin()?;
        self.backend.add(parent, bin).map_err(|error| {
            warn!("Failed inserting Sub-Graph: {error:#}");
            GraphError::link(&self.name, self.backend.element_name(parent))
        })?;

        self.parent = Some(parent.clone());
        self.state = SubGraphState::Inserted;

        Ok(())
    }

    /// Detach this Sub-Graph from `parent`. Only valid once per successful [`Self::insert_into`].
    #[instrument(level = "debug", skip(self, parent), fields(sub_graph = %self.name))]
    pub fn remove_from(&mut self, parent: &B::Element) -> Result<()> {
        let Some(current_parent) = self.parent.take() else {
            return Err(GraphError::InvalidHandle(format!(
                "Sub-Graph {:?} is not inserted into any parent",
                self.name
            )));
        };

        if &current_parent != parent {
            let error = GraphError::InvalidHandle(format!(
                "Sub-Graph {:?} is inserted into {:?}, not {:?}",
                self.name,
                self.backend.element_name(&current_parent),
                self.backend.element_name(parent),
            ));
            self.parent = Some(current_parent);
            return Err(error);
        }

        self.deactivate();

        let bin = self.bin()?;
        if let Err(error) = self.backend.remove(&current_parent, bin) {
            warn!("Failed removing Sub-Graph {:?} from its parent: {error:#}", self.name);
        }

        self.state = SubGraphState::Removed;

        Ok(())
    }

    pub fn activate(&mut self) {
        self.stages
            .iter_mut()
            .for_each(|stage| stage.state = StageState::Active);
    }

    pub fn deactivate(&mut self) {
        self.stages
            .iter_mut()
            .filter(|stage| stage.state == StageState::Active)
            .for_each(|stage| stage.state = StageState::Attached);
    }

    /// Tear everything down, in reverse order of creation. Calling it again is a no-op.
    #[instrument(level = "debug", skip(self), fields(sub_graph = %self.name))]
    pub fn dismantle(&mut self) {
        let Some(bin) = self.bin.take() else {
            return;
        };

        if let Some(parent) = self.parent.take() {
            warn!("Sub-Graph {:?} still inserted while dismantling, removing it", self.name);
            if let Err(error) = self.backend.remove(&parent, &bin) {
                warn!("Failed removing Sub-Graph {:?} from its parent: {error:#}", self.name);
            }
        }

        self.boundary = None;
        for pad in self.ghost_pads.drain(..).rev() {
            if let Err(error) = self.backend.remove_ghost_pad(&bin, &pad) {
                warn!("Failed removing boundary pad: {error:#}");
            }
        }

        self.unlink_internal();

        for mut stage in self.stages.drain(..).rev() {
            if let Err(error) = self.backend.remove(&bin, &stage.element) {
                warn!("Failed removing Stage {}: {error:#}", stage.index);
            }
            stage.state = StageState::Unattached;
            self.backend.destroy(stage.element);
        }

        self.backend.destroy(bin);
        self.state = SubGraphState::Removed;

        debug!("Sub-Graph {:?} dismantled", self.name);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SubGraphState {
        self.state
    }

    pub fn stages(&self) -> &[Stage<B>] {
        &self.stages
    }

    pub fn boundary(&self) -> Option<&Boundary<B::Pad>> {
        self.boundary.as_ref()
    }

    pub fn is_inserted(&self) -> bool {
        self.parent.is_some()
    }

    fn bin(&self) -> Result<&B::Element> {
        self.bin.as_ref().ok_or_else(|| {
            GraphError::InvalidHandle(format!("Sub-Graph {:?} was already dismantled", self.name))
        })
    }

    fn expect_state(&self, operation: &'static str, expected: SubGraphState) -> Result<()> {
        if self.bin.is_none() || self.state != expected {
            return Err(GraphError::OutOfOrder {
                operation,
                state: self.state,
            });
        }

        Ok(())
    }

    fn unlink_internal(&mut self) {
        for index in (0..self.internal_links).rev() {
            self.backend
                .unlink(&self.stages[index].element, &self.stages[index + 1].element);
        }
        self.internal_links = 0;
    }
}

impl<B: MediaBackend> Drop for SubGraph<B> {
    fn drop(&mut self) {
        self.dismantle();
    }
}
