#[cfg(test)]
pub mod fake_backend;
pub mod gst_backend;

use std::fmt::Debug;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::graph::types::StageSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementState {
    VoidPending,
    Null,
    Ready,
    Paused,
    Playing,
}

/// Asynchronous notifications posted by the media framework on a pipeline's bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Fault {
        source: String,
        detail: String,
        debug: Option<String>,
    },
    EndOfStream {
        source: String,
    },
    StateChanged {
        source: String,
        /// Whether the change was reported by the pipeline itself rather than one of its children
        from_root: bool,
        old: ElementState,
        new: ElementState,
        pending: ElementState,
    },
}

pub type NotificationReceiver = tokio::sync::mpsc::UnboundedReceiver<Notification>;

/// The primitives the lifecycle core consumes from the media framework.
///
/// Handles are cheap to clone (reference counted in GStreamer, ids in the fake backend) and
/// every method takes `&self`, so a backend can be shared between the components of a cycle.
pub trait MediaBackend: Debug + Send + Sync + 'static {
    type Element: Clone + Debug + PartialEq + Send + Sync + 'static;
    type Pad: Clone + Debug + Send + Sync + 'static;

    fn new_pipeline(&self, name: &str) -> Result<Self::Element>;

    fn new_bin(&self, name: &str) -> Result<Self::Element>;

    /// Instantiate an element from its factory name and apply the given properties.
    fn make_element(&self, spec: &StageSpec) -> Result<Self::Element>;

    fn element_name(&self, element: &Self::Element) -> String;

    fn pad_name(&self, pad: &Self::Pad) -> String;

    fn add(&self, bin: &Self::Element, element: &Self::Element) -> Result<()>;

    fn remove(&self, bin: &Self::Element, element: &Self::Element) -> Result<()>;

    /// Give up the last reference to a top-level element (pipeline or detached element).
    fn destroy(&self, element: Self::Element);

    fn link(&self, src: &Self::Element, sink: &Self::Element) -> Result<()>;

    fn unlink(&self, src: &Self::Element, sink: &Self::Element);

    fn static_pad(&self, element: &Self::Element, name: &str) -> Option<Self::Pad>;

    fn add_ghost_pad(&self, bin: &Self::Element, name: &str, target: &Self::Pad)
        -> Result<Self::Pad>;

    fn remove_ghost_pad(&self, bin: &Self::Element, pad: &Self::Pad) -> Result<()>;

    fn link_pads(&self, src: &Self::Pad, sink: &Self::Pad) -> Result<()>;

    fn unlink_pads(&self, src: &Self::Pad, sink: &Self::Pad) -> Result<()>;

    /// Request a pad by its concrete name, e.g. `send_rtp_sink_0`.
    fn request_pad(&self, element: &Self::Element, name: &str) -> Result<Self::Pad>;

    fn release_request_pad(&self, element: &Self::Element, pad: &Self::Pad);

    /// Start delivering the pipeline's bus messages, in arrival order, into a channel.
    fn subscribe(&self, pipeline: &Self::Element) -> Result<NotificationReceiver>;

    fn unsubscribe(&self, pipeline: &Self::Element);

    /// Bring the pipeline to Playing.
    fn activate(&self, pipeline: &Self::Element) -> Result<()>;

    /// Bring the pipeline back to Null.
    fn deactivate(&self, pipeline: &Self::Element) -> Result<()>;

    /// Send an end-of-stream into the pipeline once `buffers` buffers went through `pad`.
    /// `buffers` is at least 1.
    fn end_stream_after(&self, pipeline: &Self::Element, pad: &Self::Pad, buffers: u64)
        -> Result<()>;

    /// Dump the current graph of the pipeline for debugging.
    fn snapshot(&self, pipeline: &Self::Element, label: &str);

    /// Human readable statistics of an RTP session of the given session element.
    fn session_stats(&self, session_element: &Self::Element, session: u32) -> Option<String>;
}
