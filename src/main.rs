pub mod models {
    pub mod smile;
}

pub mod client;
pub mod config;
pub mod session;
pub mod snapshot;
pub mod utils;
pub mod xml;
pub mod services {
    pub mod appliances;
    pub mod commands;
    pub mod device_data;
    pub mod locations;
    pub mod power;
    pub mod realtime;
    pub mod schedules;
    pub mod thermostats;
    pub mod version;
}

#[cfg(test)]
mod testing;

use crate::client::{HttpTransport, SmileClient};
use crate::config::{Config, load_env_file};
use crate::services::realtime;
use crate::session::{GatewaySession, SmileError};
use log::{error, info, warn};
use std::ffi::OsString;
use std::path::PathBuf;
use std::thread;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

/// One-shot command given on the command line instead of polling.
#[derive(Debug, Clone, PartialEq)]
enum Action {
    SetTemperature { location: String, value: f64 },
    SetPreset { location: String, preset: String },
    SetSchedule { location: String, name: String, on: bool },
    SetRelay { appliance: String, on: bool },
    DeleteNotifications,
}

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    env_file: Option<PathBuf>,
    once: bool,
    action: Option<Action>,
}

fn run(cli: &CliArgs) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (host={}:{}, username={}, timeout={}s, poll_interval={}s, max_request_retries={})",
        cfg.host,
        cfg.port,
        cfg.username,
        cfg.timeout.as_secs(),
        cfg.poll_interval.as_secs(),
        cfg.max_request_retries.get()
    );

    // 2) Identify the gateway and load the first snapshot
    let keep_trying = cli.action.is_none() && !cli.once;
    let mut session = connect_gateway(&cfg, keep_trying)?;
    let smile = session.info();
    info!(
        "Connected to Plugwise {} (model={}, firmware={}, hostname={})",
        smile.name,
        smile.model,
        smile.version,
        smile.hostname.as_deref().unwrap_or("-")
    );

    // 3) Single command, or the polling loop
    if let Some(action) = cli.action.as_ref() {
        return run_action(&session, action);
    }
    info!("Starting poll loop: interval={}s, once={}", cfg.poll_interval.as_secs(), cli.once);
    realtime::run_loop(&mut session, cfg.poll_interval, cli.once)
}

/// Connect, retrying every poll interval when `keep_trying`; an unsupported
/// gateway is always fatal.
fn connect_gateway(cfg: &Config, keep_trying: bool) -> Result<GatewaySession<HttpTransport>, String> {
    loop {
        let client = SmileClient::connect(
            &cfg.host,
            cfg.port,
            &cfg.username,
            &cfg.password,
            cfg.timeout,
            cfg.max_request_retries,
        );
        match GatewaySession::connect(client) {
            Ok(session) => return Ok(session),
            Err(SmileError::UnsupportedDevice(key)) => return Err(format!("Smile {} is not supported", key)),
            Err(e) if keep_trying => {
                warn!(
                    "Connecting to {} failed, retrying in {}s: {}",
                    cfg.host,
                    cfg.poll_interval.as_secs(),
                    e
                );
                thread::sleep(cfg.poll_interval);
            }
            Err(e) => return Err(format!("Connecting to {} failed: {}", cfg.host, e)),
        }
    }
}

fn run_action(session: &GatewaySession<HttpTransport>, action: &Action) -> Result<(), String> {
    let applied = match action {
        Action::SetTemperature { location, value } => session.set_temperature(location, *value),
        Action::SetPreset { location, preset } => session.set_preset(location, preset),
        Action::SetSchedule { location, name, on } => session.set_schedule_state(location, name, *on),
        Action::SetRelay { appliance, on } => {
            let members = session
                .all_devices()
                .map_err(|e| format!("listing devices failed: {}", e))?
                .remove(appliance)
                .map(|d| d.members)
                .unwrap_or_default();
            session.set_relay_state(appliance, &members, *on)
        }
        Action::DeleteNotifications => session.delete_notification().map(|_| true),
    }
    .map_err(|e| format!("{:?} failed: {}", action, e))?;

    if applied {
        info!("{:?} accepted by the gateway", action);
    } else {
        warn!("{:?} not applicable: target not found on the gateway", action);
    }
    Ok(())
}

fn parse_on_off(flag: &str, value: &str) -> Result<bool, String> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("`{}` expects on|off, got {}", flag, other)),
    }
}

fn parse_args<I: Iterator<Item = OsString>>(mut args: I) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();

    let next_value = |args: &mut I, flag: &str| -> Result<String, String> {
        let value = args
            .next()
            .ok_or_else(|| format!("`{}` requires an argument", flag))?;
        value
            .into_string()
            .map_err(|_| "argument contains invalid UTF-8".to_string())
    };

    while let Some(arg) = args.next() {
        let flag = arg
            .into_string()
            .map_err(|_| "argument contains invalid UTF-8".to_string())?;
        let action = match flag.as_str() {
            "--env-file" => {
                if cli.env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                cli.env_file = Some(PathBuf::from(next_value(&mut args, &flag)?));
                continue;
            }
            s if s.starts_with("--env-file=") => {
                if cli.env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                cli.env_file = Some(PathBuf::from(path_str));
                continue;
            }
            "--once" => {
                cli.once = true;
                continue;
            }
            "--set-temperature" => {
                let location = next_value(&mut args, &flag)?;
                let raw = next_value(&mut args, &flag)?;
                let value = raw
                    .parse::<f64>()
                    .map_err(|_| format!("`--set-temperature` expects a number, got {}", raw))?;
                Action::SetTemperature { location, value }
            }
            "--set-preset" => Action::SetPreset {
                location: next_value(&mut args, &flag)?,
                preset: next_value(&mut args, &flag)?,
            },
            "--set-schedule" => Action::SetSchedule {
                location: next_value(&mut args, &flag)?,
                name: next_value(&mut args, &flag)?,
                on: parse_on_off(&flag, &next_value(&mut args, &flag)?)?,
            },
            "--set-relay" => Action::SetRelay {
                appliance: next_value(&mut args, &flag)?,
                on: parse_on_off(&flag, &next_value(&mut args, &flag)?)?,
            },
            "--delete-notifications" => Action::DeleteNotifications,
            "--" => break,
            other => return Err(format!("unrecognised argument: {}", other)),
        };
        if cli.action.is_some() {
            return Err("only one command may be given per invocation".to_string());
        }
        cli.action = Some(action);
    }

    Ok(cli)
}

fn configure_env(cli: &CliArgs) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = cli.env_file.clone() {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            load_env_file(&default_path)?;
            Ok(Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            }))
        } else {
            Ok(None)
        }
    }
}

fn main() {
    let mut args = std::env::args_os();
    args.next(); // skip program name
    let loaded_env = match parse_args(args).and_then(|cli| configure_env(&cli).map(|env| (cli, env))) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let (cli, loaded_env) = loaded_env;

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "smile-poller {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(&cli) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
