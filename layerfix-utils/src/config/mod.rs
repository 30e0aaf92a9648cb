//! Configuration loading
//!
//! Configuration structs are plain serde types with `Default`; these helpers
//! read them from TOML, JSON or YAML files and layer overrides on top.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Merge two JSON values (second overrides first)
fn merge_json_values(base: &mut serde_json::Value, override_value: serde_json::Value) {
    match (base, override_value) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(override_obj)) => {
            for (key, value) in override_obj {
                match base_obj.get_mut(&key) {
                    Some(existing) => merge_json_values(existing, value),
                    None => {
                        base_obj.insert(key, value);
                    }
                }
            }
        }
        (base_value, override_value) => {
            *base_value = override_value;
        }
    }
}

/// Read a file into a JSON value, picking the format from the extension
fn load_value(path: &Path) -> crate::Result<serde_json::Value> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    let content = std::fs::read_to_string(path)?;

    match extension.as_str() {
        "toml" => {
            let toml_value: toml::Value = toml::from_str(&content)
                .map_err(|e| crate::UtilError::Config(format!("TOML parse error: {}", e)))?;
            serde_json::to_value(toml_value)
                .map_err(|e| crate::UtilError::Config(format!("TOML conversion error: {}", e)))
        }
        "json" => serde_json::from_str(&content)
            .map_err(|e| crate::UtilError::Config(format!("JSON parse error: {}", e))),
        "yml" | "yaml" => serde_yaml::from_str(&content)
            .map_err(|e| crate::UtilError::Config(format!("YAML parse error: {}", e))),
        _ => Err(crate::UtilError::Config(format!(
            "Unsupported config format: {}",
            extension
        ))),
    }
}

/// Load a complete configuration from file
pub fn load_config<T>(path: &Path) -> crate::Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let value = load_value(path)?;
    serde_json::from_value(value)
        .map_err(|e| crate::UtilError::Config(format!("{}: {}", path.display(), e)))
}

/// Merge two configurations (second overrides first)
pub fn merge_configs<T>(base: &mut T, override_config: T) -> crate::Result<()>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    let override_value = serde_json::to_value(override_config)
        .map_err(|e| crate::UtilError::Serialization(format!("Override serialization error: {}", e)))?;
    merge_value_into(base, override_value)
}

fn merge_value_into<T>(base: &mut T, override_value: serde_json::Value) -> crate::Result<()>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    let mut base_value = serde_json::to_value(&*base)
        .map_err(|e| crate::UtilError::Serialization(format!("Base serialization error: {}", e)))?;

    merge_json_values(&mut base_value, override_value);

    *base = serde_json::from_value(base_value)
        .map_err(|e| crate::UtilError::Serialization(format!("Result deserialization error: {}", e)))?;

    Ok(())
}

/// Check that a configuration survives a serde round trip
pub fn validate_config<T>(config: &T) -> crate::Result<()>
where
    T: Serialize,
{
    serde_json::to_value(config)
        .map(|_| ())
        .map_err(|e| crate::UtilError::Config(format!("Config validation error: {}", e)))
}

/// Fluent builder: defaults, then files, then explicit overrides.
///
/// Files may be partial; keys they omit keep the value from the previous
/// layer.
#[derive(Debug)]
pub struct ConfigBuilder<T> {
    config: T,
}

impl<T> ConfigBuilder<T>
where
    T: Default + Serialize + for<'de> Deserialize<'de>,
{
    pub fn new() -> Self {
        Self {
            config: T::default(),
        }
    }

    /// Merge a (possibly partial) file over the current values
    pub fn load_file(mut self, path: &Path) -> crate::Result<Self> {
        let file_value = load_value(path)?;
        merge_value_into(&mut self.config, file_value)?;
        Ok(self)
    }

    /// Merge a file if it exists, otherwise keep the current values
    pub fn load_optional_file(self, path: &Path) -> crate::Result<Self> {
        if path.exists() {
            self.load_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merge with another complete config
    pub fn merge(mut self, other: T) -> crate::Result<Self> {
        merge_configs(&mut self.config, other)?;
        Ok(self)
    }

    /// Validate and build final config
    pub fn build(self) -> crate::Result<T> {
        validate_config(&self.config)?;
        Ok(self.config)
    }
}

impl<T> Default for ConfigBuilder<T>
where
    T: Default + Serialize + for<'de> Deserialize<'de>,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct TestConfig {
        name: String,
        timeout_ms: u64,
        enabled: bool,
        layers: Vec<u8>,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                name: "default".to_string(),
                timeout_ms: 30_000,
                enabled: true,
                layers: vec![1, 2],
            }
        }
    }

    #[test]
    fn test_load_config_toml() -> crate::Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("engine.toml");
        std::fs::write(
            &config_path,
            "name = \"ci\"\ntimeout_ms = 9000\nenabled = false\nlayers = [3, 4]\n",
        )?;

        let config: TestConfig = load_config(&config_path)?;

        assert_eq!(config.name, "ci");
        assert_eq!(config.timeout_ms, 9000);
        assert!(!config.enabled);
        assert_eq!(config.layers, vec![3, 4]);
        Ok(())
    }

    #[test]
    fn test_builder_keeps_defaults_for_missing_keys() -> crate::Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("partial.yaml");
        std::fs::write(&config_path, "timeout_ms: 1200\n")?;

        let config: TestConfig = ConfigBuilder::new().load_file(&config_path)?.build()?;

        assert_eq!(config.timeout_ms, 1200);
        assert_eq!(config.name, "default");
        assert_eq!(config.layers, vec![1, 2]);
        Ok(())
    }

    #[test]
    fn test_optional_file_missing() -> crate::Result<()> {
        let temp_dir = tempdir()?;
        let config: TestConfig = ConfigBuilder::new()
            .load_optional_file(&temp_dir.path().join("absent.json"))?
            .build()?;
        assert_eq!(config, TestConfig::default());
        Ok(())
    }

    #[test]
    fn test_merge_configs() -> crate::Result<()> {
        let mut base = TestConfig::default();
        let override_config = TestConfig {
            name: "override".to_string(),
            timeout_ms: 5,
            enabled: false,
            layers: vec![7],
        };

        merge_configs(&mut base, override_config)?;

        assert_eq!(base.name, "override");
        assert_eq!(base.timeout_ms, 5);
        assert!(!base.enabled);
        assert_eq!(base.layers, vec![7]);
        Ok(())
    }

    #[test]
    fn test_unsupported_extension() -> crate::Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("engine.ini");
        std::fs::write(&config_path, "x=1")?;

        let result: crate::Result<TestConfig> = load_config(&config_path);
        assert!(matches!(result, Err(crate::UtilError::Config(_))));
        Ok(())
    }
}
