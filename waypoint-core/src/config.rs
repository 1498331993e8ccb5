//! Layered configuration (SPEC_FULL §3 "`WaypointConfig`"): built-in defaults,
//! overlaid by an optional `waypoint.yaml`, overlaid by a `.env` file (via
//! `dotenvy`), overlaid by `WAYPOINT_`-prefixed process environment variables.
//! Recognized keys map 1:1 to §6's configuration table.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Error produced while loading or reading [`WaypointConfig`].
#[derive(Debug)]
pub enum ConfigError {
    NotFound(String),
    TypeMismatch { key: String, expected: &'static str },
    Load(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "config key not found: {key}"),
            ConfigError::TypeMismatch { key, expected } => {
                write!(f, "config type mismatch for `{key}`: expected {expected}")
            }
            ConfigError::Load(msg) => write!(f, "config load error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A single configuration value. `List`/`Map` exist for completeness of the
/// YAML surface even though every key the core itself reads is scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    List(Vec<ConfigValue>),
    Map(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    fn from_yaml(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Bool(b) => ConfigValue::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ConfigValue::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    ConfigValue::Float(f)
                } else {
                    ConfigValue::String(n.to_string())
                }
            }
            serde_yaml::Value::String(s) => ConfigValue::String(s.clone()),
            serde_yaml::Value::Sequence(seq) => {
                ConfigValue::List(seq.iter().map(ConfigValue::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(map) => {
                let mut out = HashMap::new();
                for (k, v) in map {
                    if let serde_yaml::Value::String(key) = k {
                        out.insert(key.clone(), ConfigValue::from_yaml(v));
                    }
                }
                ConfigValue::Map(out)
            }
            serde_yaml::Value::Null | serde_yaml::Value::Tagged(_) => ConfigValue::String(String::new()),
        }
    }
}

/// Converts a [`ConfigValue`] into a concrete Rust type.
pub trait FromConfigValue: Sized {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError>;
}

impl FromConfigValue for String {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::String(s) => Ok(s.clone()),
            ConfigValue::Integer(i) => Ok(i.to_string()),
            ConfigValue::Float(f) => Ok(f.to_string()),
            ConfigValue::Bool(b) => Ok(b.to_string()),
            _ => Err(ConfigError::TypeMismatch { key: key.to_string(), expected: "String" }),
        }
    }
}

macro_rules! impl_from_config_value_int {
    ($($ty:ty),*) => {
        $(
            impl FromConfigValue for $ty {
                fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
                    match value {
                        ConfigValue::Integer(i) => <$ty>::try_from(*i).map_err(|_| ConfigError::TypeMismatch { key: key.to_string(), expected: stringify!($ty) }),
                        ConfigValue::String(s) => s.parse().map_err(|_| ConfigError::TypeMismatch { key: key.to_string(), expected: stringify!($ty) }),
                        _ => Err(ConfigError::TypeMismatch { key: key.to_string(), expected: stringify!($ty) }),
                    }
                }
            }
        )*
    };
}

impl_from_config_value_int!(u16, u32, u64, usize, i64);

impl FromConfigValue for f64 {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Float(f) => Ok(*f),
            ConfigValue::Integer(i) => Ok(*i as f64),
            ConfigValue::String(s) => s.parse().map_err(|_| ConfigError::TypeMismatch { key: key.to_string(), expected: "f64" }),
            _ => Err(ConfigError::TypeMismatch { key: key.to_string(), expected: "f64" }),
        }
    }
}

impl FromConfigValue for bool {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Bool(b) => Ok(*b),
            ConfigValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::TypeMismatch { key: key.to_string(), expected: "bool" }),
            },
            _ => Err(ConfigError::TypeMismatch { key: key.to_string(), expected: "bool" }),
        }
    }
}

/// Layered configuration for a Waypoint application (SPEC_FULL §3).
///
/// Precedence, lowest to highest: built-in defaults, `waypoint.yaml` in the
/// working directory, a `.env` file loaded via `dotenvy` (populates process
/// environment without overwriting already-set variables), then any
/// `WAYPOINT_`-prefixed environment variable (`WAYPOINT_TIMEOUT` overrides
/// `timeout`).
#[derive(Debug, Clone)]
pub struct WaypointConfig {
    values: HashMap<String, ConfigValue>,
}

const ENV_PREFIX: &str = "WAYPOINT_";

impl WaypointConfig {
    /// Load configuration from `waypoint.yaml` (if present), `.env`, and the
    /// process environment. Fails fast on a malformed YAML file rather than
    /// silently falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut values = Self::defaults();

        load_yaml_file(Path::new("waypoint.yaml"), &mut values)?;

        let _ = dotenvy::dotenv();

        for (env_key, env_val) in std::env::vars() {
            if let Some(key) = env_key.strip_prefix(ENV_PREFIX) {
                values.insert(key.to_lowercase(), ConfigValue::String(env_val));
            }
        }

        Ok(Self { values })
    }

    /// Built-in defaults only, with no file or environment overlay — used by
    /// tests and as the base layer of [`WaypointConfig::load`].
    pub fn defaults() -> HashMap<String, ConfigValue> {
        let mut values = HashMap::new();
        values.insert("timeout".into(), ConfigValue::Integer(30_000));
        values.insert("max_request_size".into(), ConfigValue::Integer(1024 * 1024));
        values.insert("case_sensitive".into(), ConfigValue::Bool(false));
        values.insert("strict".into(), ConfigValue::Bool(false));
        values.insert("cache_size".into(), ConfigValue::Integer(20_000));
        values.insert("enable_events".into(), ConfigValue::Bool(true));
        values.insert("request_id_header".into(), ConfigValue::String("x-request-id".into()));
        values.insert("trusted_proxy_depth".into(), ConfigValue::Integer(0));
        values
    }

    pub fn empty() -> Self {
        Self { values: HashMap::new() }
    }

    pub fn set(&mut self, key: &str, value: ConfigValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get<T: FromConfigValue>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self.values.get(key).ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
        T::from_config_value(value, key)
    }

    pub fn get_or<T: FromConfigValue>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.get_or("timeout", 30_000u64))
    }

    pub fn max_request_size(&self) -> usize {
        self.get_or("max_request_size", 1024 * 1024usize)
    }

    pub fn case_sensitive(&self) -> bool {
        self.get_or("case_sensitive", false)
    }

    pub fn strict(&self) -> bool {
        self.get_or("strict", false)
    }

    pub fn cache_size(&self) -> usize {
        self.get_or("cache_size", 20_000usize)
    }

    pub fn enable_events(&self) -> bool {
        self.get_or("enable_events", true)
    }

    pub fn request_id_header(&self) -> String {
        self.get_or("request_id_header", "x-request-id".to_string())
    }

    pub fn trusted_proxy_depth(&self) -> u32 {
        self.get_or("trusted_proxy_depth", 0u32)
    }
}

impl Default for WaypointConfig {
    fn default() -> Self {
        Self { values: Self::defaults() }
    }
}

fn load_yaml_file(path: &Path, values: &mut HashMap<String, ConfigValue>) -> Result<(), ConfigError> {
    if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Load(e.to_string()))?;
        let yaml: serde_yaml::Value = serde_yaml::from_str(&content).map_err(|e| ConfigError::Load(e.to_string()))?;
        flatten_yaml("", &yaml, values);
    }
    Ok(())
}

fn flatten_yaml(prefix: &str, value: &serde_yaml::Value, out: &mut HashMap<String, ConfigValue>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let key_str = match k {
                    serde_yaml::Value::String(s) => s.clone(),
                    other => format!("{other:?}"),
                };
                let full_key = if prefix.is_empty() { key_str } else { format!("{prefix}.{key_str}") };
                flatten_yaml(&full_key, v, out);
            }
        }
        leaf => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), ConfigValue::from_yaml(leaf));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_recognized_key() {
        let config = WaypointConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(30_000));
        assert_eq!(config.max_request_size(), 1024 * 1024);
        assert!(!config.case_sensitive());
        assert!(!config.strict());
        assert_eq!(config.cache_size(), 20_000);
        assert!(config.enable_events());
        assert_eq!(config.request_id_header(), "x-request-id");
        assert_eq!(config.trusted_proxy_depth(), 0);
    }

    #[test]
    fn set_overrides_a_single_key() {
        let mut config = WaypointConfig::default();
        config.set("cache_size", ConfigValue::Integer(500));
        assert_eq!(config.cache_size(), 500);
    }

    #[test]
    fn missing_key_without_default_is_not_found() {
        let config = WaypointConfig::empty();
        let err = config.get::<String>("nope").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut config = WaypointConfig::empty();
        config.set("flag", ConfigValue::String("not-a-bool".into()));
        let err = config.get::<bool>("flag").unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { .. }));
    }

    #[test]
    fn flattens_nested_yaml_into_dotted_keys() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("waypoint:\n  cache_size: 500\n  strict: true\n").unwrap();
        let mut values = HashMap::new();
        flatten_yaml("", &yaml, &mut values);
        assert!(matches!(values.get("waypoint.cache_size"), Some(ConfigValue::Integer(500))));
        assert!(matches!(values.get("waypoint.strict"), Some(ConfigValue::Bool(true))));
    }
}
