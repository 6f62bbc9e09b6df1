use anyhow::{Context, bail};
use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, info};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use lorawan_flood_sim::config::SimulationConfig;
use lorawan_flood_sim::driver::{CommandChannel, DriverCommand, HELP, parse_command, simulation_task};
use lorawan_flood_sim::fleet::{devices_beyond_range, generate_demo_fleet, load_fleet};
use lorawan_flood_sim::simulation::{MemoryStore, SimulationRunner, ThresholdAlertEvaluator};

/// LoRaWAN flood-monitoring network simulator.
///
/// Reads operator commands from stdin once started.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "lorawan-flood-sim")]
#[command(version, about, long_about = None)]
struct CliArgs {
    /// Engine configuration (TOML); built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sensor fleet (JSON); a demo fleet is generated when omitted
    #[arg(long)]
    fleet: Option<PathBuf>,

    /// Number of demo sensors generated when no fleet file is given
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u64).range(1..=10_000))]
    demo_devices: u64,

    /// Random seed, overrides the configuration file
    #[arg(long)]
    seed: Option<u64>,

    /// Start auto-advance immediately
    #[arg(long)]
    autostart: bool,
}

fn main() -> anyhow::Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("lorawan_flood_sim"), LevelFilter::Debug)
        .init();

    let args = CliArgs::parse();
    info!("Starting up");

    let mut config = match &args.config {
        Some(path) => SimulationConfig::load(path).with_context(|| format!("Cannot load configuration {}", path.display()))?,
        None => SimulationConfig::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let devices = match &args.fleet {
        Some(path) => load_fleet(path).with_context(|| format!("Cannot load fleet {}", path.display()))?,
        None => {
            let mut rng = match config.seed {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                None => ChaCha8Rng::from_entropy(),
            };
            let fleet = generate_demo_fleet(args.demo_devices as usize, &config.gateway, &mut rng);
            info!("Generated {} demo devices", fleet.len());
            fleet
        }
    };
    devices_beyond_range(&devices, &config);

    let store = MemoryStore::with_devices(devices).context("Invalid fleet")?;
    let alerts = ThresholdAlertEvaluator::new(config.alerts.clone());
    let auto_step_interval = embassy_time::Duration::from_millis(config.driver.auto_step_interval_ms);
    let mut runner = SimulationRunner::new(config, store, alerts);
    if args.autostart {
        runner.start();
    }

    let command_channel: &'static CommandChannel = Box::leak(Box::new(CommandChannel::new()));
    let command_tx = command_channel.sender();
    let command_rx = command_channel.receiver();

    let simulation_handle = thread::Builder::new()
        .name("simulation".to_string())
        .spawn(move || futures::executor::block_on(simulation_task(runner, command_rx, auto_step_interval)))
        .context("Failed to spawn simulation thread")?;

    println!("{}", HELP);
    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(command) => {
                let quit = command == DriverCommand::Quit;
                if command_tx.try_send(command).is_err() {
                    log::warn!("Command queue full, dropped: {}", line.trim());
                }
                if quit {
                    break;
                }
            }
            Err(e) => println!("{}\n{}", e, HELP),
        }
    }

    // Stdin closed without an explicit quit.
    let _ = command_tx.try_send(DriverCommand::Quit);
    if simulation_handle.join().is_err() {
        bail!("Simulation thread panicked");
    }
    Ok(())
}
