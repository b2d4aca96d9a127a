//! Config utils.

use std::collections::HashMap;
use std::str::FromStr;

use crate::core::error::ConfigError;

/// Parses config value string, which consists of two parts - name and options.
/// Example: `Random[seed=42]` parts are name `Random` and options string `seed=42`.
pub fn parse_config_value(config_str: &str) -> (String, Option<String>) {
    match config_str.split_once('[') {
        Some((l, r)) => (l.trim().to_string(), Some(r.replace(']', ""))),
        None => (config_str.trim().to_string(), None),
    }
}

/// Parses options string from config value, returns map with option names and values.
///
/// # Examples
///
/// ```rust
/// use dslab_cloudsim::core::config::options::parse_options;
///
/// let options = parse_options("threshold=0.8,guest_selection=MaximumUsage");
/// assert_eq!(options.get("threshold").unwrap(), "0.8");
/// assert_eq!(options.get("guest_selection").unwrap(), "MaximumUsage");
/// assert_eq!(options.get("host_selection"), None);
/// ```
pub fn parse_options(options_str: &str) -> HashMap<String, String> {
    let mut options = HashMap::new();
    for option_str in options_str.split(',') {
        if let Some((name, value)) = option_str.split_once('=') {
            options.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    options
}

/// Returns parsed option value, `default` if the option is absent or an error if it can't be parsed.
pub fn parse_option<T: FromStr>(options: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError> {
    match options.get(name) {
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::InvalidOption {
            name: name.to_string(),
            value: value.clone(),
        }),
        None => Ok(default),
    }
}
