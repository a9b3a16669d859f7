use std::{io::prelude::*, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::{
    graph::types::StageSpec,
    lifecycle::types::{CycleConfig, TransportConfig},
};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct HeaderSettingsFile {
    pub name: String,
    pub version: u32,
}

impl Default for HeaderSettingsFile {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SettingsStruct {
    #[serde(default)]
    pub header: HeaderSettingsFile,
    pub cycle: CycleConfig,
}

/// What the sender's topology is built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SenderOptions {
    pub host: String,
    pub rtp_port: u16,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub dma_buf: bool,
    pub source: String,
    pub encoder: String,
    pub duration: Duration,
    pub eos_after_buffers: Option<u64>,
}

/// The capture, encode and packetize chain of the RTP video sender:
///
/// `source ! video/x-raw,... ! encoder ! video/x-h264,... ! rtph264pay`
pub fn sender_cycle_config(options: &SenderOptions) -> CycleConfig {
    let mut source = StageSpec::new(&options.source);
    let mut encoder = StageSpec::new(&options.encoder);
    if options.dma_buf {
        source = source.property("io-mode", "dmabuf");
        encoder = encoder.property("output-io-mode", "dmabuf-import");
    }

    let raw_caps = format!(
        "video/x-raw,framerate=(fraction){}/1,format=(string)I420,width=(int){},height=(int){}",
        options.framerate, options.width, options.height
    );
    let h264_caps = "video/x-h264,stream-format=(string)byte-stream,alignment=(string)au,profile=(string)constrained-baseline";

    CycleConfig {
        name: "rtpbin-sender".to_string(),
        stages: vec![
            source,
            StageSpec::new("capsfilter").property("caps", raw_caps),
            encoder,
            StageSpec::new("capsfilter").property("caps", h264_caps),
            StageSpec::new("rtph264pay").property("config-interval", 2),
        ],
        transport: TransportConfig {
            host: options.host.clone(),
            data_port: options.rtp_port,
        },
        // Saturate rather than wrap
        run_duration_ms: u64::try_from(options.duration.as_millis()).unwrap_or(u64::MAX),
        eos_after_buffers: options.eos_after_buffers,
    }
}

#[instrument(level = "debug")]
pub fn load_settings_from_file(file_name: &str) -> Result<CycleConfig> {
    let content = std::fs::read_to_string(file_name)
        .with_context(|| format!("Failed reading settings file {file_name:?}"))?;

    let settings: SettingsStruct = serde_json::from_str(&content)
        .with_context(|| format!("Failed parsing settings file {file_name:?}"))?;

    debug!("Loaded settings: {settings:#?}");

    Ok(settings.cycle)
}

#[instrument(level = "debug", skip(cycle))]
pub fn save_settings_to_file(file_name: &str, cycle: &CycleConfig) -> Result<()> {
    if let Some(folder) = Path::new(file_name).parent() {
        if !folder.as_os_str().is_empty() {
            std::fs::create_dir_all(folder)
                .with_context(|| format!("Failed to create settings folder {folder:?}"))?;
        }
    }

    let mut file = std::fs::File::create(file_name)
        .with_context(|| format!("Failed creating settings file {file_name:?}"))?;
    file.write_all(to_json(cycle)?.as_bytes())?;

    Ok(())
}

pub fn to_json(cycle: &CycleConfig) -> Result<String> {
    let settings = SettingsStruct {
        header: HeaderSettingsFile::default(),
        cycle: cycle.clone(),
    };

    Ok(serde_json::to_string_pretty(&settings)?)
}
