use std::sync::Arc;

use tracing::*;

use crate::backend::MediaBackend;

use super::{
    error::{GraphError, Result},
    types::{ChannelKind, ConnectionPoint, StageSpec, TransportTarget},
};

pub const SESSION_ELEMENT_FACTORY: &str = "rtpbin";
pub const DATA_TRANSPORT_FACTORY: &str = "udpsink";
pub const FEEDBACK_OUT_TRANSPORT_FACTORY: &str = "udpsink";
pub const FEEDBACK_IN_TRANSPORT_FACTORY: &str = "udpsrc";

#[derive(Debug)]
struct Outstanding<B: MediaBackend> {
    point: ConnectionPoint,
    request_pad: B::Pad,
    transport: B::Element,
    /// Link between the session element and the transport, as (src, sink)
    transport_link: (B::Pad, B::Pad),
}

/// The RTP session node: hands out request-based connection points, each one paired with the
/// transport element that carries its channel over UDP.
///
/// Every point must be released before the Session Sink goes away. Dropping it releases
/// whatever is still outstanding, with a warning.
#[derive(Debug)]
pub struct SessionSink<B: MediaBackend> {
    backend: Arc<B>,
    id: uuid::Uuid,
    parent: B::Element,
    element: Option<B::Element>,
    next_session: u32,
    next_point: u64,
    outstanding: Vec<Outstanding<B>>,
    requested: usize,
}

impl<B: MediaBackend> SessionSink<B> {
    #[instrument(level = "debug", skip(backend, parent))]
    pub fn create(backend: Arc<B>, parent: &B::Element) -> Result<Self> {
        let id = uuid::Uuid::new_v4();
        let spec = StageSpec::new(SESSION_ELEMENT_FACTORY).named(&format!("session-{id}"));

        let element = backend.make_element(&spec).map_err(|error| {
            GraphError::construction(None, SESSION_ELEMENT_FACTORY, format!("{error:#}"))
        })?;

        if let Err(error) = backend.add(parent, &element) {
            backend.destroy(element);
            return Err(GraphError::construction(
                None,
                SESSION_ELEMENT_FACTORY,
                format!("{error:#}"),
            ));
        }

        Ok(Self {
            backend,
            id,
            parent: parent.clone(),
            element: Some(element),
            next_session: 0,
            next_point: 0,
            outstanding: Vec::new(),
            requested: 0,
        })
    }

    /// Open a new RTP session whose packets leave towards `target`.
    ///
    /// Returns the point the media must be linked to. Each call opens a distinct session.
    #[instrument(level = "debug", skip(self), fields(session_sink = %self.id))]
    pub fn request_data_channel(&mut self, target: &TransportTarget) -> Result<ConnectionPoint> {
        let session = self.next_session;
        let transport = StageSpec::new(DATA_TRANSPORT_FACTORY)
            .property("host", &target.host)
            .property("port", target.port);

        let point = self.open(ChannelKind::Data, session, transport)?;
        self.next_session += 1;

        Ok(point)
    }

    /// Send the RTCP of `session` towards `target`, without synchronizing it to the data.
    #[instrument(level = "debug", skip(self), fields(session_sink = %self.id))]
    pub fn request_feedback_out(
        &mut self,
        session: u32,
        target: &TransportTarget,
    ) -> Result<ConnectionPoint> {
        self.expect_session(session)?;

        let transport = StageSpec::new(FEEDBACK_OUT_TRANSPORT_FACTORY)
            .property("host", &target.host)
            .property("port", target.port)
            .property("async", false)
            .property("sync", false);

        self.open(ChannelKind::FeedbackOut, session, transport)
    }

    /// Receive the RTCP of `session` on the local `port`.
    #[instrument(level = "debug", skip(self), fields(session_sink = %self.id))]
    pub fn request_feedback_in(&mut self, session: u32, port: u16) -> Result<ConnectionPoint> {
        self.expect_session(session)?;

        let transport = StageSpec::new(FEEDBACK_IN_TRANSPORT_FACTORY).property("port", port);

        self.open(ChannelKind::FeedbackIn, session, transport)
    }

    /// The request pad behind `point`, for linking it from outside.
    pub fn pad(&self, point: &ConnectionPoint) -> Result<&B::Pad> {
        self.find(point)
            .map(|position| &self.outstanding[position].request_pad)
    }

    /// Break the transport link, give the request pad back and drop the transport element.
    ///
    /// Any link made from outside to the point's pad must be broken before.
    #[instrument(level = "debug", skip(self), fields(session_sink = %self.id))]
    pub fn release(&mut self, point: &ConnectionPoint) -> Result<()> {
        let position = self.find(point)?;
        let outstanding = self.outstanding.remove(position);
        self.close(outstanding);

        Ok(())
    }

    pub fn release_all(&mut self) {
        while let Some(outstanding) = self.outstanding.pop() {
            self.close(outstanding);
        }
    }

    /// Number of points requested and not yet released
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Number of points ever requested
    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn sessions(&self) -> std::ops::Range<u32> {
        0..self.next_session
    }

    pub fn session_stats(&self, session: u32) -> Option<String> {
        let element = self.element.as_ref()?;
        self.backend.session_stats(element, session)
    }

    /// Release what is left and remove the session element from its parent. Calling it again is
    /// a no-op.
    #[instrument(level = "debug", skip(self), fields(session_sink = %self.id))]
    pub fn destroy(&mut self) {
        if self.element.is_none() {
            return;
        }

        if !self.outstanding.is_empty() {
            warn!(
                "Destroying Session Sink with {} outstanding connection points, releasing them",
                self.outstanding.len()
            );
            self.release_all();
        }

        if let Some(element) = self.element.take() {
            self.remove_element(element);
        }
    }

    fn remove_element(&self, element: B::Element) {
        if let Err(error) = self.backend.remove(&self.parent, &element) {
            warn!("Failed removing session element from its parent: {error:#}");
        }
        self.backend.destroy(element);
        debug!("Session Sink {} destroyed", self.id);
    }

    fn open(
        &mut self,
        kind: ChannelKind,
        session: u32,
        transport_spec: StageSpec,
    ) -> Result<ConnectionPoint> {
        let element = self
            .element
            .clone()
            .ok_or_else(|| GraphError::InvalidHandle(format!("Session Sink {} was destroyed", self.id)))?;
        let backend = self.backend.clone();

        let pad_name = kind.request_pad_name(session);
        let request_pad = backend.request_pad(&element, &pad_name).map_err(|error| {
            GraphError::construction(None, &pad_name, format!("{error:#}"))
        })?;
        self.requested += 1;

        // Give the pad back if anything below fails
        let request_pad_guard = scopeguard::guard(
            (backend.clone(), element.clone(), request_pad.clone()),
            |(backend, element, request_pad)| backend.release_request_pad(&element, &request_pad),
        );

        let transport = backend.make_element(&transport_spec).map_err(|error| {
            GraphError::construction(None, &transport_spec.factory, format!("{error:#}"))
        })?;
        if let Err(error) = backend.add(&self.parent, &transport) {
            backend.destroy(transport);
            return Err(GraphError::construction(
                None,
                &transport_spec.factory,
                format!("{error:#}"),
            ));
        }

        let transport_guard = scopeguard::guard(
            (backend.clone(), self.parent.clone(), transport.clone()),
            |(backend, parent, transport)| {
                if let Err(error) = backend.remove(&parent, &transport) {
                    warn!("Failed removing transport element: {error:#}");
                }
                backend.destroy(transport);
            },
        );

        let (src, sink) = match kind {
            ChannelKind::Data => (
                backend.static_pad(&element, &format!("send_rtp_src_{session}")),
                backend.static_pad(&transport, "sink"),
            ),
            ChannelKind::FeedbackOut => (
                Some(request_pad.clone()),
                backend.static_pad(&transport, "sink"),
            ),
            ChannelKind::FeedbackIn => (
                backend.static_pad(&transport, "src"),
                Some(request_pad.clone()),
            ),
        };

        let (Some(src), Some(sink)) = (src, sink) else {
            return Err(GraphError::link(
                format!("{}.{pad_name}", backend.element_name(&element)),
                backend.element_name(&transport),
            ));
        };

        backend.link_pads(&src, &sink).map_err(|error| {
            warn!("Failed linking {kind:?} channel of session {session}: {error:#}");
            GraphError::link(backend.pad_name(&src), backend.pad_name(&sink))
        })?;

        scopeguard::ScopeGuard::into_inner(transport_guard);
        scopeguard::ScopeGuard::into_inner(request_pad_guard);

        let point = ConnectionPoint {
            owner: self.id,
            id: self.next_point,
            session,
            kind,
        };
        self.next_point += 1;

        self.outstanding.push(Outstanding {
            point,
            request_pad,
            transport,
            transport_link: (src, sink),
        });

        debug!("Requested {kind:?} connection point {pad_name:?} (session {session})");

        Ok(point)
    }

    fn close(&self, outstanding: Outstanding<B>) {
        let Outstanding {
            point,
            request_pad,
            transport,
            transport_link: (src, sink),
        } = outstanding;

        if let Err(error) = self.backend.unlink_pads(&src, &sink) {
            warn!("Failed unlinking transport of {point:?}: {error:#}");
        }

        if let Some(element) = &self.element {
            self.backend.release_request_pad(element, &request_pad);
        }

        if let Err(error) = self.backend.remove(&self.parent, &transport) {
            warn!("Failed removing transport of {point:?}: {error:#}");
        }
        self.backend.destroy(transport);

        debug!("Released {:?} connection point of session {}", point.kind, point.session);
    }

    fn find(&self, point: &ConnectionPoint) -> Result<usize> {
        if point.owner != self.id {
            return Err(GraphError::InvalidHandle(format!(
                "{point:?} does not belong to Session Sink {}",
                self.id
            )));
        }

        self.outstanding
            .iter()
            .position(|outstanding| outstanding.point.id == point.id)
            .ok_or_else(|| GraphError::InvalidHandle(format!("{point:?} was already released")))
    }

    fn expect_session(&self, session: u32) -> Result<()> {
        if session >= self.next_session {
            return Err(GraphError::InvalidHandle(format!(
                "Session {session} has no data channel"
            )));
        }

        Ok(())
    }
}

impl<B: MediaBackend> Drop for SessionSink<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}
