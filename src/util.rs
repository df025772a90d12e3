use std::path::PathBuf;

pub const INFLUX_HOST: &str = "INFLUX_HOST";
pub const INFLUX_PORT: &str = "INFLUX_PORT";
pub const INFLUX_ORGANIZATION: &str = "INFLUX_ORGANIZATION";
pub const INFLUX_BUCKET: &str = "INFLUX_BUCKET";
pub const INFLUX_TOKEN: &str = "INFLUX_TOKEN";
pub const INFLUX_SERVICE_TAG: &str = "INFLUX_SERVICE_TAG";
pub const INFLUX_SEND_VERSION_TAG: &str = "INFLUX_SEND_VERSION_TAG";
pub const INFLUX_TIMEOUT_SECONDS: &str = "INFLUX_TIMEOUT_SECONDS";
pub const TOR_HOSTS: &str = "TOR_HOSTS";
pub const TOR_TIMEOUT_SECONDS: &str = "TOR_TIMEOUT_SECONDS";
pub const RUN_EVERY_SECONDS: &str = "RUN_EVERY_SECONDS";
pub const HEALTHCHECK_FILE: &str = "HEALTHCHECK_FILE";
pub const VERBOSE: &str = "VERBOSE";

const DEFAULT_TOR_TIMEOUT: u64 = 10;

const DEFAULT_INFLUX_TIMEOUT: u64 = 30;

const HEALTHCHECK_FILE_NAME: &str = "healthcheck";

pub fn get_default_tor_timeout() -> u64 {
    DEFAULT_TOR_TIMEOUT
}

pub fn get_default_influx_timeout() -> u64 {
    DEFAULT_INFLUX_TIMEOUT
}

/// Only a case-insensitive `true` enables a toggle; anything else leaves it off.
pub fn parse_flag(value: Option<&str>) -> bool {
    value.is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

/// Default location of the readiness artifact: next to the running executable.
pub fn get_default_healthcheck_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(HEALTHCHECK_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(HEALTHCHECK_FILE_NAME))
}
