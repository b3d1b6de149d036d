use std::env;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_API_BASE_URL: &str = "https://onlinebusiness.icbc.com/deas-api/v1";
pub const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";

const DEFAULT_DATE_START: &str = "2025-06-24";
const DEFAULT_DATE_END: &str = "2025-06-30";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("invalid value for {name}: {message}")]
    Invalid { name: String, message: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    /// Surname exactly as it appears on the licence.
    pub last_name: String,
    pub licence_number: String,
    /// Security keyword registered with the licensing office.
    pub keyword: String,
    pub mailbox_address: String,
    pub mailbox_app_password: String,
    pub imap_host: String,
    pub exam_type: String,
    /// Service-location ids to poll, in priority order.
    pub location_ids: Vec<i64>,
    pub date_range_start: NaiveDate,
    pub date_range_end: NaiveDate,
    pub check_interval: Duration,
    pub token_refresh_interval: Duration,
}

impl AppConfig {
    /// Load configuration from the environment.
    ///
    /// Refuses to start when any required credential variable is unset or
    /// empty; the error lists every missing name at once.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut require = |name: &str| -> String {
            match env::var(name) {
                Ok(value) if !value.trim().is_empty() => value,
                _ => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        };

        let last_name = require("USER_LAST_NAME");
        let licence_number = require("USER_LICENSE_NUMBER");
        let keyword = require("USER_KEYWORD");
        let mailbox_address = require("USER_GMAIL");
        let mailbox_app_password = require("USER_GMAIL_APP_PASSWORD");

        if !missing.is_empty() {
            return Err(ConfigError::MissingVariables(missing));
        }

        let date_range_start = parse_date("DESIRED_DATE_START", DEFAULT_DATE_START)?;
        let date_range_end = parse_date("DESIRED_DATE_END", DEFAULT_DATE_END)?;
        if date_range_end < date_range_start {
            warn!(
                "DESIRED_DATE_END {} precedes DESIRED_DATE_START {}; no slot can match",
                date_range_end, date_range_start
            );
        }

        Ok(Self {
            api_base_url: env::var("BOOKING_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            last_name,
            licence_number,
            keyword,
            mailbox_address,
            mailbox_app_password,
            imap_host: env::var("IMAP_HOST").unwrap_or_else(|_| DEFAULT_IMAP_HOST.to_string()),
            exam_type: "7-R-1".to_string(),
            location_ids: parse_location_ids()?,
            date_range_start,
            date_range_end,
            check_interval: Duration::from_secs(90),
            token_refresh_interval: Duration::from_secs(1500),
        })
    }
}

fn parse_date(name: &str, default: &str) -> Result<NaiveDate, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| ConfigError::Invalid {
        name: name.to_string(),
        message: format!("expected YYYY-MM-DD, got {raw:?}: {e}"),
    })
}

fn parse_location_ids() -> Result<Vec<i64>, ConfigError> {
    let raw = match env::var("LOCATION_IDS") {
        Ok(v) if !v.trim().is_empty() => v,
        _ => return Ok(vec![3]),
    };

    raw.split(',')
        .map(|part| {
            part.trim().parse::<i64>().map_err(|e| ConfigError::Invalid {
                name: "LOCATION_IDS".to_string(),
                message: format!("expected comma-separated integers, got {part:?}: {e}"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var mutation is process-wide, so everything runs in one test.
    #[test]
    fn from_env_round_trip() {
        let required = [
            "USER_LAST_NAME",
            "USER_LICENSE_NUMBER",
            "USER_KEYWORD",
            "USER_GMAIL",
            "USER_GMAIL_APP_PASSWORD",
        ];
        for name in required {
            env::remove_var(name);
        }
        env::remove_var("DESIRED_DATE_START");
        env::remove_var("DESIRED_DATE_END");
        env::remove_var("LOCATION_IDS");

        // All required variables missing: every name is reported.
        match AppConfig::from_env() {
            Err(ConfigError::MissingVariables(names)) => {
                assert_eq!(names.len(), required.len());
                assert!(names.contains(&"USER_KEYWORD".to_string()));
            }
            other => panic!("expected MissingVariables, got {other:?}"),
        }

        env::set_var("USER_LAST_NAME", "DOE");
        env::set_var("USER_LICENSE_NUMBER", "1234567");
        env::set_var("USER_KEYWORD", "hunter2");
        env::set_var("USER_GMAIL", "doe@example.com");

        // One missing variable is still fatal and named.
        match AppConfig::from_env() {
            Err(ConfigError::MissingVariables(names)) => {
                assert_eq!(names, vec!["USER_GMAIL_APP_PASSWORD".to_string()]);
            }
            other => panic!("expected MissingVariables, got {other:?}"),
        }

        env::set_var("USER_GMAIL_APP_PASSWORD", "app-password");

        let config = AppConfig::from_env().expect("complete environment");
        assert_eq!(config.last_name, "DOE");
        assert_eq!(config.location_ids, vec![3]);
        assert_eq!(config.exam_type, "7-R-1");
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(
            config.date_range_start,
            NaiveDate::from_ymd_opt(2025, 6, 24).unwrap()
        );
        assert_eq!(
            config.date_range_end,
            NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
        );
        assert_eq!(config.check_interval, Duration::from_secs(90));

        env::set_var("LOCATION_IDS", "3, 9,11");
        let config = AppConfig::from_env().expect("valid location list");
        assert_eq!(config.location_ids, vec![3, 9, 11]);

        env::set_var("LOCATION_IDS", "3,nine");
        match AppConfig::from_env() {
            Err(ConfigError::Invalid { name, .. }) => assert_eq!(name, "LOCATION_IDS"),
            other => panic!("expected Invalid, got {other:?}"),
        }
        env::remove_var("LOCATION_IDS");

        env::set_var("DESIRED_DATE_START", "24-06-2025");
        match AppConfig::from_env() {
            Err(ConfigError::Invalid { name, .. }) => assert_eq!(name, "DESIRED_DATE_START"),
            other => panic!("expected Invalid, got {other:?}"),
        }
        env::remove_var("DESIRED_DATE_START");
    }
}
