use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Configuration of a single Stage: which factory to instantiate and how to configure it.
///
/// Property values are kept as strings and parsed by the backend into the property's real type,
/// the same way a `gst-launch-1.0` description is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub factory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl StageSpec {
    pub fn new(factory: &str) -> Self {
        Self {
            factory: factory.to_string(),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn property(mut self, key: &str, value: impl ToString) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }
}

impl std::fmt::Display for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.factory)?;
        if let Some(name) = &self.name {
            write!(f, " name={name}")?;
        }
        for (key, value) in &self.properties {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageState {
    Unattached,
    Attached,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubGraphState {
    Built,
    LinkedInternally,
    Exposed,
    Inserted,
    Removed,
}

impl std::fmt::Display for SubGraphState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A remote (or local) UDP endpoint a transport channel is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportTarget {
    pub host: String,
    pub port: u16,
}

impl TransportTarget {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl std::fmt::Display for TransportTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

pub const FEEDBACK_OUT_PORT_OFFSET: u16 = 1;
pub const FEEDBACK_IN_PORT_OFFSET: u16 = 5;

/// Port range used by one RTP session: RTP on the data port, RTCP out on the next one,
/// and RTCP in five ports above the data port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportPorts {
    pub data: u16,
    pub feedback_out: u16,
    pub feedback_in: u16,
}

impl TransportPorts {
    pub fn from_data_port(data: u16) -> Option<Self> {
        Some(Self {
            data,
            feedback_out: data.checked_add(FEEDBACK_OUT_PORT_OFFSET)?,
            feedback_in: data.checked_add(FEEDBACK_IN_PORT_OFFSET)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Outbound RTP
    Data,
    /// Outbound RTCP
    FeedbackOut,
    /// Inbound RTCP
    FeedbackIn,
}

impl ChannelKind {
    /// Name of the session element's request pad for the given session
    pub fn request_pad_name(&self, session: u32) -> String {
        match self {
            ChannelKind::Data => format!("send_rtp_sink_{session}"),
            ChannelKind::FeedbackOut => format!("send_rtcp_src_{session}"),
            ChannelKind::FeedbackIn => format!("recv_rtcp_sink_{session}"),
        }
    }
}

/// Handle to a request-based connection point of a Session Sink.
///
/// The Session Sink keeps the real pads; this handle only identifies them, so it can be
/// copied around freely and handed back to [`release`](super::session_sink::SessionSink::release).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionPoint {
    pub(crate) owner: uuid::Uuid,
    pub(crate) id: u64,
    pub session: u32,
    pub kind: ChannelKind,
}
