use std::{sync::Arc, time::Duration};

use clap::Parser;

use crate::{
    lifecycle::types::{FaultPolicy, LifecycleConfig},
    settings::manager::SenderOptions,
};

/// Upper bound for every flag given in seconds: one year
const MAX_SECONDS: u64 = 365 * 24 * 60 * 60;

#[derive(Parser, Debug)]
#[command(
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION")
)]
struct Args {
    /// Host the RTP and RTCP packets are sent to
    #[arg(long, value_name = "IP", default_value = "192.168.2.221")]
    sender_host: String,

    /// UDP port of the RTP stream, should be even. RTCP goes out on the next port and comes
    /// back on this port + 5
    #[arg(long, value_name = "PORT", default_value = "5000")]
    rtp_port: u16,

    #[arg(long, default_value = "1280")]
    video_width: u32,

    #[arg(long, default_value = "720")]
    video_height: u32,

    #[arg(long, default_value = "30")]
    framerate: u32,

    /// Do not ask the capture and encoder elements for DMABUF io modes
    #[arg(long)]
    no_dma_buf: bool,

    /// Turns all log categories up to Debug, and logs every property change of the pipeline
    #[arg(short, long)]
    verbose: bool,

    /// Capture element factory
    #[arg(long, default_value = "v4l2src")]
    source: String,

    /// H.264 encoder element factory
    #[arg(long, default_value = "v4l2video2h264enc")]
    encoder: String,

    /// Number of build/run/teardown cycles
    #[arg(long, default_value = "10")]
    cycles: usize,

    /// Seconds each cycle runs once the pipeline is playing
    #[arg(
        long,
        value_name = "SECONDS",
        default_value = "4",
        value_parser = clap::value_parser!(u64).range(1..=MAX_SECONDS)
    )]
    duration: u64,

    /// Seconds the pipeline has to reach Playing before the cycle is considered faulty
    #[arg(
        long,
        value_name = "SECONDS",
        default_value = "10",
        value_parser = clap::value_parser!(u64).range(1..=MAX_SECONDS)
    )]
    activation_timeout: u64,

    /// Keep running cycles after one of them faulted
    #[arg(long)]
    continue_on_fault: bool,

    /// Send an end-of-stream once this many buffers left the payloader
    #[arg(long, value_name = "BUFFERS", value_parser = clap::value_parser!(u64).range(1..))]
    eos_after_buffers: Option<u64>,

    /// Log the RTP session statistics every SECONDS while running
    #[arg(
        long,
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u64).range(1..=MAX_SECONDS)
    )]
    rtcp_stats_interval: Option<u64>,

    /// JSON file with the cycle configuration to use instead of the one built from the flags
    #[arg(long, value_name = "FILE", env = "RTPBIN_SENDER_LOOP_SETTINGS")]
    settings: Option<String>,

    /// Print the effective cycle configuration as JSON and exit
    #[arg(long)]
    dump_settings: bool,

    /// Save the effective cycle configuration to FILE before running
    #[arg(long, value_name = "FILE")]
    save_settings: Option<String>,

    /// Print the run summary as JSON when done
    #[arg(long)]
    summary_json: bool,

    /// Directory for the rolling log files
    #[arg(long, value_name = "DIR")]
    log_path: Option<String>,
}

#[derive(Debug)]
struct Manager {
    args: Args,
}

lazy_static! {
    static ref MANAGER: Arc<Manager> = Arc::new(Manager::new());
}

impl Manager {
    fn new() -> Self {
        Self {
            args: Args::parse(),
        }
    }
}

// Construct our manager, should be done inside main
pub fn init() {
    MANAGER.as_ref();
}

// Check if the verbosity parameter was used
pub fn is_verbose() -> bool {
    MANAGER.as_ref().args.verbose
}

pub fn log_path() -> Option<String> {
    MANAGER.as_ref().args.log_path.clone()
}

pub fn settings_path() -> Option<String> {
    MANAGER.as_ref().args.settings.clone()
}

pub fn dump_settings() -> bool {
    MANAGER.as_ref().args.dump_settings
}

pub fn save_settings_path() -> Option<String> {
    MANAGER.as_ref().args.save_settings.clone()
}

pub fn summary_json() -> bool {
    MANAGER.as_ref().args.summary_json
}

pub fn cycles() -> usize {
    MANAGER.as_ref().args.cycles
}

pub fn sender_options() -> SenderOptions {
    sender_options_from(&MANAGER.as_ref().args)
}

pub fn lifecycle_config() -> LifecycleConfig {
    lifecycle_config_from(&MANAGER.as_ref().args)
}

// Return the command line used to start this application
pub fn command_line_string() -> String {
    std::env::args().collect::<Vec<String>>().join(" ")
}

// Return the parsed arguments
pub fn command_line() -> String {
    format!("{:#?}", MANAGER.as_ref().args)
}

fn sender_options_from(args: &Args) -> SenderOptions {
    SenderOptions {
        host: args.sender_host.clone(),
        rtp_port: args.rtp_port,
        width: args.video_width,
        height: args.video_height,
        framerate: args.framerate,
        dma_buf: !args.no_dma_buf,
        source: args.source.clone(),
        encoder: args.encoder.clone(),
        duration: Duration::from_secs(args.duration),
        eos_after_buffers: args.eos_after_buffers,
    }
}

fn lifecycle_config_from(args: &Args) -> LifecycleConfig {
    LifecycleConfig {
        fault_policy: if args.continue_on_fault {
            FaultPolicy::Continue
        } else {
            FaultPolicy::Halt
        },
        activation_timeout: Duration::from_secs(args.activation_timeout),
        stats_interval: args.rtcp_stats_interval.map(Duration::from_secs),
    }
}
