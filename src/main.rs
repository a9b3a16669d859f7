use std::sync::Arc;

use anyhow::Result;
use tracing::*;

use rtpbin_sender_loop::{
    backend::gst_backend::GstBackend,
    cli,
    lifecycle::{manager::LifecycleManager, types::FaultPolicy},
    logger, settings,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // CLI should be started before logger to allow control over verbosity
    cli::manager::init();
    // Logger should start before everything else to register any log information
    logger::manager::init();

    let cycle_config = match cli::manager::settings_path() {
        Some(file_name) => settings::manager::load_settings_from_file(&file_name)?,
        None => settings::manager::sender_cycle_config(&cli::manager::sender_options()),
    };

    if cli::manager::dump_settings() {
        println!("{}", settings::manager::to_json(&cycle_config)?);
        return Ok(());
    }

    if let Some(file_name) = cli::manager::save_settings_path() {
        settings::manager::save_settings_to_file(&file_name, &cycle_config)?;
        info!("Saved settings to {file_name:?}");
    }

    let lifecycle_config = cli::manager::lifecycle_config();
    let fault_policy = lifecycle_config.fault_policy;

    let backend = Arc::new(GstBackend::try_new(cli::manager::is_verbose())?);
    let manager = LifecycleManager::new(backend, lifecycle_config);

    let stop_handle = manager.stop_handle();
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!("Failed listening for Ctrl-C: {error:?}");
            return;
        }

        info!("Ctrl-C received, stopping after the current cycle");
        stop_handle.stop();
    });

    let summary = manager.run(cli::manager::cycles(), &cycle_config).await;

    if cli::manager::summary_json() {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if summary.rejections() > 0 {
        error!("Stopped on a rejected cycle");
        std::process::exit(1);
    }

    if fault_policy == FaultPolicy::Halt && summary.faults() > 0 {
        error!("Stopped on a pipeline fault");
        std::process::exit(1);
    }

    Ok(())
}
