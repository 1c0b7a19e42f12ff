use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use vivarium_core::config::{Config, MIN_REGION_BYTES};
use vivarium_core::telemetry::logging::{self, LogLevel};
use vivarium_core::vmcomm::PrimaryComms;

#[derive(Parser, Debug)]
#[command(name = "vivarium", about = "Primary-side host: launches and drives a simulation process")]
struct Cli {
    /// Simulation binary to launch against the shared region.
    #[arg(long, default_value = "vivarium-sim")]
    sim_binary: PathBuf,

    /// Shared region size in bytes.
    #[arg(long, env = "VIVARIUM_SHM_SIZE")]
    shm_size: Option<usize>,

    /// World class the simulation should instantiate at startup.
    #[arg(long)]
    world: Option<String>,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Write logs to a file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(bytes) = cli.shm_size {
        config.region_bytes = bytes.max(MIN_REGION_BYTES);
    }
    config.log.level = cli.log_level;
    config.log.file = cli.log_file.clone();
    logging::init(&config.log).context("initialise logging")?;

    let comms = PrimaryComms::new(config.region_bytes).context("create shared region")?;
    info!(
        path = %comms.shared_file().display(),
        bytes = comms.shared_file_size(),
        "shared region ready"
    );

    let mut child = std::process::Command::new(&cli.sim_binary)
        .arg("--shm-path")
        .arg(comms.shared_file())
        .arg("--shm-size")
        .arg(comms.shared_file_size().to_string())
        .arg("--seq-start")
        .arg(comms.next_launch_seq().to_string())
        .spawn()
        .with_context(|| format!("launch simulation process {:?}", cli.sim_binary))?;

    if let Some(world) = &cli.world {
        comms.instantiate_world(world);
    }
    comms.run_simulation();

    // Headless stand-in for the GUI collaborator: poll at display rate and
    // report what arrives.
    let mut frames: u64 = 0;
    let mut last_error_count = 0;
    let mut was_ready = false;
    loop {
        if let Some(status) = child.try_wait().context("wait for simulation process")? {
            warn!(%status, "simulation process exited");
            comms.vm_terminated();
            break;
        }

        let update = comms.poll_frame();
        if let Some(image) = &update.image {
            frames += 1;
            if frames % 120 == 1 {
                info!(
                    seq = image.paint_seq,
                    width = image.width,
                    height = image.height,
                    frames,
                    "world frame"
                );
            }
        }
        if update.ready_for_invocations && !was_ready {
            was_ready = true;
            info!("simulation ready for invocations");
        }
        if update.error_count != last_error_count {
            warn!(errors = update.error_count, "simulation reported user-code errors");
            last_error_count = update.error_count;
        }
        if let Some(ask) = &update.ask {
            // No UI to route the prompt to; unblock the simulation with an
            // empty answer.
            info!(id = ask.id, prompt = %ask.prompt, "answering ask with empty string");
            comms.send_answer(ask.id, "");
        }

        std::thread::sleep(Duration::from_millis(16));
    }

    Ok(())
}
