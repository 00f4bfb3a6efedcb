//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "AUTOTESTER";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// Worker pool size from AUTOTESTER_CONCURRENT
    pub concurrent: Option<usize>,
    /// Probe timeout from AUTOTESTER_TIMEOUT
    pub timeout: Option<u64>,
    /// Job store directory from AUTOTESTER_STORE_DIR
    pub store_dir: Option<String>,
    /// Listen address from AUTOTESTER_BIND
    pub bind: Option<String>,
    /// Retention from AUTOTESTER_RETENTION_HOURS
    pub retention_hours: Option<u64>,
    /// Log level from AUTOTESTER_LOG
    pub log_level: Option<String>,
    /// Config file from AUTOTESTER_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_lookup(|name| env::var(format!("{ENV_PREFIX}_{name}")).ok())
    }

    /// Build from any variable lookup keyed by the unprefixed name
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            concurrent: parse::<usize, _>(&lookup, "CONCURRENT").map(|n| n.max(1)),
            timeout: parse(&lookup, "TIMEOUT"),
            store_dir: lookup("STORE_DIR").filter(|v| !v.is_empty()),
            bind: lookup("BIND").filter(|v| !v.is_empty()),
            retention_hours: parse::<u64, _>(&lookup, "RETENTION_HOURS").filter(|h| *h > 0),
            log_level: lookup("LOG").filter(|v| !v.is_empty()),
            config_file: lookup("CONFIG").filter(|v| !v.is_empty()),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        *self != Self::default()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_CONCURRENT:       {:?}", ENV_PREFIX, self.concurrent);
        println!("  {}_TIMEOUT:          {:?}", ENV_PREFIX, self.timeout);
        println!("  {}_STORE_DIR:        {:?}", ENV_PREFIX, self.store_dir);
        println!("  {}_BIND:             {:?}", ENV_PREFIX, self.bind);
        println!("  {}_RETENTION_HOURS:  {:?}", ENV_PREFIX, self.retention_hours);
        println!("  {}_LOG:              {:?}", ENV_PREFIX, self.log_level);
        println!("  {}_CONFIG:           {:?}", ENV_PREFIX, self.config_file);
    }
}

/// Look up a variable and parse it, ignoring values that do not parse
fn parse<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|v| v.trim().parse().ok())
}

/// Print all AUTOTESTER environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONCURRENT       Endpoint tasks run at once per job");
    println!("  {ENV_PREFIX}_TIMEOUT          Probe request timeout in seconds");
    println!("  {ENV_PREFIX}_STORE_DIR        Directory for stored job results");
    println!("  {ENV_PREFIX}_BIND             HTTP API listen address");
    println!("  {ENV_PREFIX}_RETENTION_HOURS  Prune finished jobs older than this");
    println!("  {ENV_PREFIX}_LOG              Log level (error, warn, info, debug, trace)");
    println!("  {ENV_PREFIX}_CONFIG           Path to configuration file");
    println!("  RUST_LOG                      Overrides the log filter entirely");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_CONCURRENT=8");
    println!("  autotester run --url https://api.example.com/users");
}
