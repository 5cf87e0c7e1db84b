use std::{env, fmt::Display, str::FromStr};

use anyhow::Context;
use rust_decimal::Decimal;
use tracing::{info, warn};

pub const DEFAULT_ACTIVE_DAY_THRESHOLD: usize = 15;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub rate_per_user: Decimal,
    pub active_day_threshold: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        Ok(Self {
            database_url,
            max_connections: try_load("DATABASE_MAX_CONNECTIONS", 5),
            rate_per_user: rate_or_default(env::var("EARNINGS_RATE_PER_USER").ok()),
            active_day_threshold: try_load(
                "EARNINGS_ACTIVE_DAY_THRESHOLD",
                DEFAULT_ACTIVE_DAY_THRESHOLD,
            ),
        })
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value '{raw}': {e}, using default {default}");
            default
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

/// Rates are stored as NUMERIC(12, 2), so anything finer than a cent is rejected.
fn rate_or_default(raw: Option<String>) -> Decimal {
    let default = default_rate();
    let Some(raw) = raw else {
        return default;
    };

    match raw.trim().parse::<Decimal>() {
        Ok(rate) if rate > Decimal::ZERO && rate.normalize().scale() <= 2 => rate,
        Ok(rate) => {
            warn!("EARNINGS_RATE_PER_USER {rate} must be positive whole cents, using {default}");
            default
        }
        Err(e) => {
            warn!("Invalid EARNINGS_RATE_PER_USER '{raw}': {e}, using {default}");
            default
        }
    }
}

pub fn default_rate() -> Decimal {
    Decimal::new(2, 2)
}
