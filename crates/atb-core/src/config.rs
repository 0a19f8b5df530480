use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::{errors::Error, Result};

/// Typed configuration, read once at process start. No hot-reload.
#[derive(Clone, Debug)]
pub struct Config {
    /// Bot API credential.
    pub bot_token: String,
    /// MTProto application id/secret for the session transport. When the
    /// secret is absent the process runs the in-process transport instead.
    pub api_id: i64,
    pub api_hash: Option<String>,

    /// Administrator who settles payments.
    pub admin_id: i64,
    /// Default buyer who receives forwarded OTPs.
    pub buyer_id: i64,
    /// Optional broadcast channel for payday notices.
    pub channel_id: Option<i64>,

    /// Password intended for newly acquired accounts. Retained as a knob;
    /// never sent to the transport (see DESIGN.md).
    pub default_account_password: String,

    pub db_path: PathBuf,

    /// Daily operating window, civil hours in West Africa Time (UTC+1).
    pub operating_start_hour: u32,
    pub operating_end_hour: u32,
    /// How often the cached window flag is recomputed.
    pub window_refresh: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("BOT_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let admin_id = env_i64("ADMIN_ID").unwrap_or(0);
        if admin_id == 0 {
            return Err(Error::Config(
                "ADMIN_ID environment variable is required".to_string(),
            ));
        }

        let buyer_id = env_i64("BUYER_ID").unwrap_or(0);
        if buyer_id == 0 {
            return Err(Error::Config(
                "BUYER_ID environment variable is required".to_string(),
            ));
        }

        let api_id = env_i64("API_ID").unwrap_or(0);
        let api_hash = env_str("API_HASH").and_then(non_empty);
        let channel_id = env_i64("CHANNEL_ID").filter(|id| *id != 0);

        let default_account_password =
            env_str("DEFAULT_ACCOUNT_PASSWORD").unwrap_or_else(|| "changed-on-sale".to_string());

        let db_path = env_path("DB_PATH").unwrap_or_else(|| PathBuf::from("accounts.db"));

        let operating_start_hour = env_u32("OPERATING_START_HOUR").unwrap_or(8);
        let operating_end_hour = env_u32("OPERATING_END_HOUR").unwrap_or(22);
        if operating_start_hour > 23 || operating_end_hour > 23 {
            return Err(Error::Config(format!(
                "operating hours must be 0-23, got {operating_start_hour}..{operating_end_hour}"
            )));
        }
        if operating_start_hour == operating_end_hour {
            return Err(Error::Config(
                "OPERATING_START_HOUR and OPERATING_END_HOUR must differ".to_string(),
            ));
        }

        let window_refresh = Duration::from_secs(env_u64("WINDOW_REFRESH_SECS").unwrap_or(300));

        Ok(Self {
            bot_token,
            api_id,
            api_hash,
            admin_id,
            buyer_id,
            channel_id,
            default_account_password,
            db_path,
            operating_start_hour,
            operating_end_hour,
            window_refresh,
        })
    }

    /// True when no MTProto credentials are configured and the process should
    /// run against the in-process session transport.
    pub fn dry_run_transport(&self) -> bool {
        self.api_id == 0 || self.api_hash.is_none()
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
