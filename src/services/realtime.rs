use crate::client::Transport;
use crate::models::smile::{Device, DeviceData};
use crate::services::device_data::device_data;
use crate::session::{GatewaySession, SmileError};
use chrono::Local;
use log::{debug, info, warn};
use serde::Serialize;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

/// One JSON line of poll output.
#[derive(Debug, Serialize)]
struct DeviceReport<'a> {
    id: &'a str,
    device: &'a Device,
    data: &'a DeviceData,
}

pub fn run_loop<T: Transport>(session: &mut GatewaySession<T>, interval: Duration, once: bool) -> Result<(), String> {
    loop {
        let tick_start = Instant::now();

        let stdout = std::io::stdout();
        match poll_once(session, &mut stdout.lock()) {
            Ok(count) => debug!("Reported {} device(s)", count),
            Err(e) if once => return Err(format!("poll failed: {}", e)),
            Err(e) => warn!("Poll failed, retrying next tick: {}", e),
        }
        if once {
            return Ok(());
        }

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

/// Refresh, then write one line per device to `out`.
pub fn poll_once<T: Transport, W: Write>(session: &mut GatewaySession<T>, out: &mut W) -> Result<usize, SmileError> {
    session.full_update()?;

    for (id, notification) in session.notifications() {
        info!("Gateway notification {} ({}): {}", id, notification.kind, notification.message);
    }

    let snapshot = session.snapshot()?;
    let inventory = session.inventory()?;
    let now = Local::now().naive_local();
    debug!("Highest ranked thermostat: {:?}", inventory.thermostats.thermo_master);

    let mut count = 0;
    for (id, device) in &inventory.devices {
        let Some(data) = device_data(snapshot, &inventory, id, now) else {
            continue;
        };
        let report = DeviceReport {
            id,
            device,
            data: &data,
        };
        let line = match serde_json::to_string(&report) {
            Ok(line) => line,
            Err(e) => {
                warn!("Unable to serialize report for {}: {}", id, e);
                continue;
            }
        };
        if let Err(e) = writeln!(out, "{}", line) {
            warn!("Dropping report for {}: {}", id, e);
            continue;
        }
        count += 1;
    }
    Ok(count)
}
