use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::auth::DEFAULT_BCRYPT_COST;

/// Accepted `SESSION_TTL_DAYS` values: one day up to ten years
pub const SESSION_TTL_DAYS_RANGE: RangeInclusive<i64> = 1..=3650;

/// Runtime settings read from the environment (and `.env`, when present)
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub session_ttl_days: i64,
    pub bcrypt_cost: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            database_path: "chirp.db".to_string(),
            session_ttl_days: 14,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parse_or("PORT", env::var("PORT").ok(), defaults.port),
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            session_ttl_days: parse_in_range(
                "SESSION_TTL_DAYS",
                env::var("SESSION_TTL_DAYS").ok(),
                SESSION_TTL_DAYS_RANGE,
                defaults.session_ttl_days,
            ),
            bcrypt_cost: parse_or("BCRYPT_COST", env::var("BCRYPT_COST").ok(), defaults.bcrypt_cost),
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match raw {
        Some(value) => value.trim().parse().unwrap_or_else(|e| {
            log::warn!("Invalid {} value {:?}: {}, using default {}", key, value, e, default);
            default
        }),
        None => default,
    }
}

fn parse_in_range<T>(key: &str, raw: Option<String>, range: RangeInclusive<T>, default: T) -> T
where
    T: FromStr + Display + PartialOrd + Copy,
    T::Err: Display,
{
    let value = parse_or(key, raw, default);
    if range.contains(&value) {
        value
    } else {
        log::warn!(
            "{} value {} is outside {}..={}, using default {}",
            key,
            value,
            range.start(),
            range.end(),
            default
        );
        default
    }
}
