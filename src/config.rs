//! Minimal runtime configuration helpers.
//! Defaults match a Smile on the local network with factory credentials.

use crate::client::{DEFAULT_PORT, DEFAULT_TIMEOUT, DEFAULT_USERNAME};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::num::NonZeroU32;
use std::time::Duration;
use std::{fs, path::Path};

pub const DEFAULT_POLL_SECS: u64 = 60;
pub const DEFAULT_MAX_REQUEST_RETRIES: u32 = 3;
const PASSWORD_FILE: &str = "smile_password.txt";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// The gateway id printed on the back of the Smile.
    pub password: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Polling cadence.
    pub poll_interval: Duration,
    /// Extra attempts after a transport failure.
    pub max_request_retries: NonZeroU32,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let host = match std::env::var("SMILE_HOST") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => return Err("Missing gateway address: set SMILE_HOST".to_string()),
        };

        // Prefer env var; fallback to smile_password.txt in working directory
        let password = match std::env::var("SMILE_PASSWORD") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => match fs::read_to_string(Path::new(PASSWORD_FILE)) {
                Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => {
                    return Err(format!(
                        "Missing gateway password: set SMILE_PASSWORD or provide {} in working directory",
                        PASSWORD_FILE
                    ));
                }
            },
        };

        let username = match std::env::var("SMILE_USERNAME") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => DEFAULT_USERNAME.to_string(),
        };

        let port = parse_var("SMILE_PORT", DEFAULT_PORT)?;
        let timeout_secs = parse_var("SMILE_TIMEOUT_SECS", DEFAULT_TIMEOUT.as_secs())?;
        let poll_secs = parse_var("POLL_INTERVAL_SECS", DEFAULT_POLL_SECS)?;

        let retries = parse_var("MAX_REQUEST_RETRIES", DEFAULT_MAX_REQUEST_RETRIES)?;
        let max_request_retries =
            NonZeroU32::new(retries).ok_or_else(|| "MAX_REQUEST_RETRIES must be at least 1".to_string())?;

        Ok(Config {
            host,
            port,
            username,
            password,
            timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_secs(poll_secs),
            max_request_retries,
        })
    }
}

/// Parse `key` when set and non-empty, otherwise `default`.
fn parse_var<V: std::str::FromStr>(key: &str, default: V) -> Result<V, String> {
    match std::env::var(key) {
        Ok(s) if !s.trim().is_empty() => s
            .trim()
            .parse::<V>()
            .map_err(|_| format!("{} must be a number, got {:?}", key, s)),
        _ => Ok(default),
    }
}

/// Export `KEY=value` lines from `path`; variables already set in the
/// process environment are left alone.
pub fn load_env_file(path: &Path) -> Result<(), String> {
    let file = File::open(path).map_err(|e| format!("failed to open {}: {}", path.display(), e))?;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| format!("failed to read {} at line {}: {}", path.display(), index + 1, e))?;
        let Some((key, value)) =
            parse_env_assignment(&line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// One `.env` line: blank lines and comments yield `None`, `export` is optional.
fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(quote @ ('"' | '\'')) => parse_quoted(&raw[1..], quote)?,
        _ => raw.split('#').next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

/// Value up to the closing `quote`; backslash escapes apply inside double quotes only.
fn parse_quoted(input: &str, quote: char) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        if ch == quote {
            let rest = chars.as_str().trim();
            if rest.is_empty() || rest.starts_with('#') {
                return Ok(result);
            }
            return Err(format!("unexpected characters after closing {} quote", quote));
        }
        if ch == '\\' && quote == '"' {
            let escaped = chars
                .next()
                .ok_or_else(|| "unterminated escape sequence in double-quoted value".to_string())?;
            result.push(match escaped {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
            continue;
        }
        result.push(ch);
    }
    Err(format!("unterminated {} quoted value", quote))
}
