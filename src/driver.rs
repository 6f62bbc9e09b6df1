//! Operator command channel and the auto-advance loop.
//!
//! The runner lives inside [`simulation_task`], which waits on two things with
//! `select`: the next operator command, or the wall-clock deadline of the next
//! automatic step. Commands arrive as text lines parsed by [`parse_command`].

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, Timer};

use crate::simulation::alerts::AlertEvaluator;
use crate::simulation::runner::SimulationRunner;
use crate::simulation::store::{MemoryStore, Store};
use crate::simulation::types::DeviceStatus;
use crate::stats::NetworkStats;

pub const COMMAND_CHANNEL_SIZE: usize = 32;
pub type CommandChannel = embassy_sync::channel::Channel<CriticalSectionRawMutex, DriverCommand, COMMAND_CHANNEL_SIZE>;
pub type CommandReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, DriverCommand, COMMAND_CHANNEL_SIZE>;
pub type CommandSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, DriverCommand, COMMAND_CHANNEL_SIZE>;

#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    /// Resume auto-advance.
    Start,
    /// Pause auto-advance.
    Stop,
    /// Pause auto-advance and run one step, optionally with an explicit delta in seconds.
    Step(Option<i64>),
    Reset,
    Override { device_id: u32, water_level_cm: f64 },
    ClearOverride(u32),
    Maintenance { device_id: u32, enabled: bool },
    /// List unresolved alerts.
    Alerts,
    Acknowledge(u64),
    /// Close an alert by hand, stamped with the simulated clock.
    Resolve(u64),
    Status,
    Quit,
}

pub const HELP: &str = "commands: start | stop | step [seconds] | reset | override <id> <cm> | clear <id> | maintenance <id> on|off | alerts | ack <alert> | resolve <alert> | status | quit";

/// Parse one operator line. Keywords are case-insensitive.
pub fn parse_command(line: &str) -> Result<DriverCommand, String> {
    let mut parts = line.split_whitespace();
    let Some(keyword) = parts.next() else {
        return Err("Empty command".to_string());
    };
    let args: Vec<&str> = parts.collect();

    let command = match (keyword.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("start", []) => DriverCommand::Start,
        ("stop", []) => DriverCommand::Stop,
        ("step", []) => DriverCommand::Step(None),
        ("step", [seconds]) => DriverCommand::Step(Some(seconds.parse().map_err(|_| format!("Invalid step size: {}", seconds))?)),
        ("reset", []) => DriverCommand::Reset,
        ("override", [id, level]) => {
            let water_level_cm: f64 = level.parse().map_err(|_| format!("Invalid water level: {}", level))?;
            if !water_level_cm.is_finite() || water_level_cm < 0.0 {
                return Err(format!("Water level must be a non-negative number, got {}", level));
            }
            DriverCommand::Override {
                device_id: parse_device_id(id)?,
                water_level_cm,
            }
        }
        ("clear", [id]) => DriverCommand::ClearOverride(parse_device_id(id)?),
        ("maintenance", [id, mode]) => {
            let enabled = match mode.to_ascii_lowercase().as_str() {
                "on" => true,
                "off" => false,
                other => return Err(format!("Expected on or off, got {}", other)),
            };
            DriverCommand::Maintenance {
                device_id: parse_device_id(id)?,
                enabled,
            }
        }
        ("alerts", []) => DriverCommand::Alerts,
        ("ack" | "acknowledge", [id]) => DriverCommand::Acknowledge(parse_alert_id(id)?),
        ("resolve", [id]) => DriverCommand::Resolve(parse_alert_id(id)?),
        ("status", []) => DriverCommand::Status,
        ("quit" | "exit", []) => DriverCommand::Quit,
        (keyword, _) => return Err(format!("Unknown command or wrong arguments: {}", keyword)),
    };
    Ok(command)
}

fn parse_device_id(id: &str) -> Result<u32, String> {
    id.parse().map_err(|_| format!("Invalid device id: {}", id))
}

fn parse_alert_id(id: &str) -> Result<u64, String> {
    id.parse().map_err(|_| format!("Invalid alert id: {}", id))
}

/// Apply one command to the runner. Returns `false` once the loop should exit.
pub fn handle_command<A: AlertEvaluator>(runner: &mut SimulationRunner<MemoryStore, A>, command: DriverCommand) -> bool {
    match command {
        DriverCommand::Start => runner.start(),
        DriverCommand::Stop => runner.stop(),
        DriverCommand::Step(delta) => {
            runner.stop();
            run_step(runner, delta);
        }
        DriverCommand::Reset => runner.reset(),
        DriverCommand::Override { device_id, water_level_cm } => runner.set_override(device_id, water_level_cm),
        DriverCommand::ClearOverride(device_id) => {
            if runner.clear_override(device_id).is_none() {
                log::warn!("Device {} has no water level override", device_id);
            }
        }
        DriverCommand::Maintenance { device_id, enabled } => {
            let status = if enabled { DeviceStatus::Maintenance } else { DeviceStatus::Online };
            match runner.store_mut().set_device_status(device_id, status) {
                Ok(()) => log::info!("Device {} set to {}", device_id, status),
                Err(e) => log::warn!("Cannot change status of device {}: {}", device_id, e),
            }
        }
        DriverCommand::Alerts => log_open_alerts(runner.store()),
        DriverCommand::Acknowledge(alert_id) => match runner.store_mut().acknowledge_alert(alert_id) {
            Ok(()) => log::info!("Alert {} acknowledged", alert_id),
            Err(e) => log::warn!("Cannot acknowledge alert {}: {}", alert_id, e),
        },
        DriverCommand::Resolve(alert_id) => {
            let now = runner.current_time();
            match runner.store_mut().resolve_alert(alert_id, now) {
                Ok(()) => log::info!("Alert {} resolved at {}", alert_id, now),
                Err(e) => log::warn!("Cannot resolve alert {}: {}", alert_id, e),
            }
        }
        DriverCommand::Status => log_status(runner),
        DriverCommand::Quit => {
            runner.stop();
            log::info!("Shutting down simulation");
            return false;
        }
    }
    true
}

/// Run one step, stopping auto-advance if it fails.
fn run_step<A: AlertEvaluator>(runner: &mut SimulationRunner<MemoryStore, A>, delta: Option<i64>) {
    match runner.step(delta, true) {
        Ok(Some(report)) => {
            log::info!(
                "{}: {}/{} delivered, {} throttled, {} collisions, {} failed, {} new alerts",
                report.time.format("%Y-%m-%d %H:%M:%S"),
                report.delivered,
                report.devices_processed,
                report.duty_cycle_blocked,
                report.collisions,
                report.failed_devices,
                report.alerts_opened
            );
            if !report.went_offline.is_empty() {
                log::warn!("Devices went offline: {:?}", report.went_offline);
            }
        }
        Ok(None) => {}
        Err(e) => {
            log::error!("Step failed: {}", e);
            runner.stop();
        }
    }
}

fn log_open_alerts(store: &MemoryStore) {
    let mut any = false;
    for alert in store.open_alerts() {
        any = true;
        log::info!("#{} device {} {} {:?} {:?}: {}", alert.id, alert.device_id, alert.kind, alert.severity, alert.status, alert.message);
    }
    if !any {
        log::info!("No open alerts");
    }
}

fn log_status<A: AlertEvaluator>(runner: &SimulationRunner<MemoryStore, A>) {
    let store = runner.store();
    let devices = match store.list_all_devices() {
        Ok(devices) => devices,
        Err(e) => {
            log::error!("Cannot list devices: {}", e);
            return;
        }
    };
    let count = |status: DeviceStatus| devices.iter().filter(|d| d.status == status).count();
    log::info!(
        "{} at {}: {} online, {} offline, {} maintenance, {} open alerts, {} overrides",
        if runner.is_running() { "Running" } else { "Stopped" },
        runner.current_time().format("%Y-%m-%d %H:%M:%S"),
        count(DeviceStatus::Online),
        count(DeviceStatus::Offline),
        count(DeviceStatus::Maintenance),
        store.open_alerts().count(),
        runner.overrides().len()
    );
    log::info!("{}", NetworkStats::compute(store.readings(), &devices));
}

/// Drive the runner until a [`DriverCommand::Quit`] arrives.
///
/// While running, a step is executed every `auto_step_interval` of wall-clock
/// time; a failed step stops auto-advance.
pub async fn simulation_task<A: AlertEvaluator>(mut runner: SimulationRunner<MemoryStore, A>, commands: CommandReceiver, auto_step_interval: Duration) {
    log::info!("Simulation loop started, auto step every {} ms", auto_step_interval.as_millis());
    let mut next_tick = Instant::now() + auto_step_interval;
    loop {
        match select(commands.receive(), Timer::at(next_tick)).await {
            Either::First(command) => {
                log::debug!("Command: {:?}", command);
                if !handle_command(&mut runner, command) {
                    break;
                }
            }
            Either::Second(()) => {
                next_tick = Instant::now() + auto_step_interval;
                if runner.is_running() {
                    run_step(&mut runner, None);
                }
            }
        }
    }
}
