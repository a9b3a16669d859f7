use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::{anyhow, Context, Result};
use gst::prelude::*;
use tracing::*;

use crate::graph::types::StageSpec;

use super::{ElementState, MediaBackend, Notification, NotificationReceiver};

impl From<gst::State> for ElementState {
    fn from(state: gst::State) -> Self {
        match state {
            gst::State::VoidPending => ElementState::VoidPending,
            gst::State::Null => ElementState::Null,
            gst::State::Ready => ElementState::Ready,
            gst::State::Paused => ElementState::Paused,
            gst::State::Playing => ElementState::Playing,
            _ => ElementState::VoidPending,
        }
    }
}

#[derive(Debug)]
pub struct GstBackend {
    verbose: bool,
}

impl GstBackend {
    #[instrument(level = "debug")]
    pub fn try_new(verbose: bool) -> Result<Self> {
        gst::init().context("Failed initializing GStreamer")?;

        let (major, minor, micro, nano) = gst::version();
        debug!("Using GStreamer {major}.{minor}.{micro}.{nano}");

        Ok(Self { verbose })
    }
}

fn as_bin(element: &gst::Element) -> Result<&gst::Bin> {
    element
        .downcast_ref::<gst::Bin>()
        .with_context(|| format!("Element {:?} is not a Bin", element.name()))
}

fn notification_from_message(message: &gst::Message) -> Option<Notification> {
    use gst::MessageView;

    let source = message
        .src()
        .map(|src| src.path_string().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match message.view() {
        MessageView::Error(error) => Some(Notification::Fault {
            source,
            detail: error.error().to_string(),
            debug: error.debug().map(|debug| debug.to_string()),
        }),
        MessageView::Eos(_) => Some(Notification::EndOfStream { source }),
        MessageView::StateChanged(state) => Some(Notification::StateChanged {
            from_root: state
                .src()
                .is_some_and(|src| src.downcast_ref::<gst::Pipeline>().is_some()),
            old: state.old().into(),
            new: state.current().into(),
            pending: state.pending().into(),
            source,
        }),
        MessageView::Warning(warning) => {
            warn!(
                "Warning from {source}: {} ({:?})",
                warning.error(),
                warning.debug()
            );
            None
        }
        _ => None,
    }
}

impl MediaBackend for GstBackend {
    type Element = gst::Element;
    type Pad = gst::Pad;

    #[instrument(level = "debug", skip(self))]
    fn new_pipeline(&self, name: &str) -> Result<gst::Element> {
        let pipeline = gst::Pipeline::with_name(name);

        if self.verbose {
            pipeline.connect_deep_notify(None, |_, object, pspec| {
                if !pspec.flags().contains(glib::ParamFlags::READABLE) {
                    return;
                }
                debug!(
                    "{}: {} = {:?}",
                    object.path_string(),
                    pspec.name(),
                    object.property_value(pspec.name())
                );
            });
        }

        Ok(pipeline.upcast())
    }

    fn new_bin(&self, name: &str) -> Result<gst::Element> {
        Ok(gst::Bin::with_name(name).upcast())
    }

    #[instrument(level = "debug", skip(self), fields(stage = %spec))]
    fn make_element(&self, spec: &StageSpec) -> Result<gst::Element> {
        let mut builder = gst::ElementFactory::make(&spec.factory);
        if let Some(name) = &spec.name {
            builder = builder.name(name.as_str());
        }
        let element = builder
            .build()
            .with_context(|| format!("Failed to make element {:?}", spec.factory))?;

        for (key, value) in &spec.properties {
            let pspec = element.find_property(key).with_context(|| {
                format!("Element {:?} has no property {key:?}", spec.factory)
            })?;

            if !pspec.flags().contains(glib::ParamFlags::WRITABLE) {
                return Err(anyhow!(
                    "Property {key:?} of {:?} is not writable",
                    spec.factory
                ));
            }

            let value = <glib::Value as gst::prelude::GstValueExt>::deserialize(
                value,
                pspec.value_type(),
            )
            .map_err(|error| {
                anyhow!("Invalid value {value:?} for property {key:?}: {error:?}")
            })?;

            element.set_property_from_value(key, &value);
        }

        Ok(element)
    }

    fn element_name(&self, element: &gst::Element) -> String {
        element.name().to_string()
    }

    fn pad_name(&self, pad: &gst::Pad) -> String {
        let parent = pad
            .parent()
            .map(|parent| parent.name().to_string())
            .unwrap_or_default();

        format!("{parent}:{}", pad.name())
    }

    fn add(&self, bin: &gst::Element, element: &gst::Element) -> Result<()> {
        as_bin(bin)?
            .add(element)
            .with_context(|| format!("Failed adding {:?} to {:?}", element.name(), bin.name()))
    }

    fn remove(&self, bin: &gst::Element, element: &gst::Element) -> Result<()> {
        as_bin(bin)?.remove(element).with_context(|| {
            format!("Failed removing {:?} from {:?}", element.name(), bin.name())
        })
    }

    fn destroy(&self, element: gst::Element) {
        if element.parent().is_some() {
            warn!("Destroying element {:?} that still has a parent", element.name());
        }

        if let Err(error) = element.set_state(gst::State::Null) {
            warn!("Failed setting {:?} to Null: {error:?}", element.name());
        }
    }

    fn link(&self, src: &gst::Element, sink: &gst::Element) -> Result<()> {
        src.link(sink)
            .with_context(|| format!("Failed linking {:?} to {:?}", src.name(), sink.name()))
    }

    fn unlink(&self, src: &gst::Element, sink: &gst::Element) {
        src.unlink(sink);
    }

    fn static_pad(&self, element: &gst::Element, name: &str) -> Option<gst::Pad> {
        element.static_pad(name)
    }

    fn add_ghost_pad(&self, bin: &gst::Element, name: &str, target: &gst::Pad) -> Result<gst::Pad> {
        let ghost_pad = gst::GhostPad::builder(target.direction()).name(name).build();
        ghost_pad
            .set_target(Some(target))
            .with_context(|| format!("Failed targeting ghost pad {name:?}"))?;
        bin.add_pad(&ghost_pad)
            .with_context(|| format!("Failed adding ghost pad {name:?} to {:?}", bin.name()))?;

        Ok(ghost_pad.upcast())
    }

    fn remove_ghost_pad(&self, bin: &gst::Element, pad: &gst::Pad) -> Result<()> {
        if let Some(ghost_pad) = pad.downcast_ref::<gst::GhostPad>() {
            if let Err(error) = ghost_pad.set_target(None::<&gst::Pad>) {
                warn!("Failed clearing ghost pad target: {error:?}");
            }
        }

        bin.remove_pad(pad)
            .with_context(|| format!("Failed removing pad {:?} from {:?}", pad.name(), bin.name()))
    }

    fn link_pads(&self, src: &gst::Pad, sink: &gst::Pad) -> Result<()> {
        src.link(sink).with_context(|| {
            format!(
                "Failed linking {} to {}",
                self.pad_name(src),
                self.pad_name(sink)
            )
        })?;

        Ok(())
    }

    fn unlink_pads(&self, src: &gst::Pad, sink: &gst::Pad) -> Result<()> {
        src.unlink(sink).with_context(|| {
            format!(
                "Failed unlinking {} from {}",
                self.pad_name(src),
                self.pad_name(sink)
            )
        })
    }

    fn request_pad(&self, element: &gst::Element, name: &str) -> Result<gst::Pad> {
        element
            .request_pad_simple(name)
            .with_context(|| format!("Failed requesting pad {name:?} from {:?}", element.name()))
    }

    fn release_request_pad(&self, element: &gst::Element, pad: &gst::Pad) {
        element.release_request_pad(pad);
    }

    #[instrument(level = "debug", skip(self, pipeline), fields(pipeline = %pipeline.name()))]
    fn subscribe(&self, pipeline: &gst::Element) -> Result<NotificationReceiver> {
        let (notification_tx, notification_rx) = tokio::sync::mpsc::unbounded_channel();

        let bus = pipeline
            .bus()
            .context("Unable to access the pipeline bus")?;
        bus.set_sync_handler(move |_, message| {
            if let Some(notification) = notification_from_message(message) {
                let _ = notification_tx.send(notification);
            }

            gst::BusSyncReply::Drop
        });

        Ok(notification_rx)
    }

    fn unsubscribe(&self, pipeline: &gst::Element) {
        if let Some(bus) = pipeline.bus() {
            bus.unset_sync_handler();
        }
    }

    #[instrument(level = "debug", skip(self, pipeline), fields(pipeline = %pipeline.name()))]
    fn activate(&self, pipeline: &gst::Element) -> Result<()> {
        pipeline
            .set_state(gst::State::Playing)
            .with_context(|| format!("Failed setting {:?} to Playing", pipeline.name()))?;

        Ok(())
    }

    #[instrument(level = "debug", skip(self, pipeline), fields(pipeline = %pipeline.name()))]
    fn deactivate(&self, pipeline: &gst::Element) -> Result<()> {
        pipeline
            .set_state(gst::State::Null)
            .with_context(|| format!("Failed setting {:?} to Null", pipeline.name()))?;

        Ok(())
    }

    #[instrument(level = "debug", skip(self, pipeline, pad))]
    fn end_stream_after(&self, pipeline: &gst::Element, pad: &gst::Pad, buffers: u64) -> Result<()> {
        let pipeline_weak = pipeline.downgrade();
        let counter = Arc::new(AtomicU64::new(0));

        pad.add_probe(gst::PadProbeType::BUFFER, move |_pad, _info| {
            if counter.fetch_add(1, Ordering::Relaxed) + 1 < buffers {
                return gst::PadProbeReturn::Ok;
            }

            // Sending the event from the streaming thread would deadlock
            let pipeline_weak = pipeline_weak.clone();
            if let Err(error) = std::thread::Builder::new()
                .name("EOS".to_string())
                .spawn(move || {
                    let Some(pipeline) = pipeline_weak.upgrade() else {
                        return;
                    };
                    if !pipeline.send_event(gst::event::Eos::new()) {
                        error!("Failed sending Eos event into {:?}", pipeline.name());
                    }
                })
            {
                error!("Failed spawning EOS thread: {error:?}");
            }

            gst::PadProbeReturn::Remove
        })
        .context("Failed adding buffer probe")?;

        Ok(())
    }

    fn snapshot(&self, pipeline: &gst::Element, label: &str) {
        let Ok(bin) = as_bin(pipeline) else {
            return;
        };

        bin.debug_to_dot_file_with_ts(
            gst::DebugGraphDetails::all(),
            format!("{}-{label}", pipeline.name()),
        );
    }

    fn session_stats(&self, session_element: &gst::Element, session: u32) -> Option<String> {
        let factory = session_element.factory()?;
        if factory.name().as_str() != "rtpbin" {
            return None;
        }

        let internal_session = session_element
            .emit_by_name::<Option<glib::Object>>("get-internal-session", &[&session])?;
        let stats = internal_session.property::<gst::Structure>("stats");

        Some(stats.to_string())
    }
}
