use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

/// Free-form service attributes, as handed over by the host.
pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_camera_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_fps")]
    pub fps: f64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { fps: default_fps() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the service attributes and that the input camera is declared.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let attrs = DiffAttributes::from_attributes(&self.service.attributes)?;
        if self.camera(&attrs.input_camera).is_none() {
            return Err(ConfigError::Invalid(format!(
                "input camera {} not found in [[cameras]]",
                attrs.input_camera
            )));
        }
        if !(MIN_FPS..=MAX_FPS).contains(&self.watch.fps) {
            return Err(ConfigError::Invalid(format!(
                "watch.fps must be between {MIN_FPS} and {MAX_FPS}"
            )));
        }
        Ok(())
    }

    pub fn camera(&self, name: &str) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.name == name)
    }
}

/// Typed view of the pixel-diff service attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffAttributes {
    /// Maximum number of reference images kept in memory.
    pub image_memories: usize,
    /// Name of the camera the service depends on.
    pub input_camera: String,
    /// Minimum normalized difference, in `[0, 1]`.
    pub required_diff: f64,
}

pub const DEFAULT_REQUIRED_DIFF: f64 = 0.2;

/// Slowest watch rate: one frame every ~17 minutes.
pub const MIN_FPS: f64 = 0.001;
pub const MAX_FPS: f64 = 1000.0;

impl DiffAttributes {
    /// Validate a raw attribute map.
    ///
    /// `image_memories` must be an integer >= 1, `input_camera` a string, and
    /// `required_diff`, when present, a number within `[0, 1]`.
    pub fn from_attributes(attrs: &Attributes) -> Result<Self, ConfigError> {
        let image_memories = match attrs.get("image_memories") {
            None => return Err(invalid("image_memories is required")),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(v) if v >= 1 => usize::try_from(v)
                    .map_err(|_| invalid("image_memories is out of range"))?,
                _ => return Err(invalid("image_memories must be a positive integer")),
            },
            Some(_) => return Err(invalid("image_memories must be a positive integer")),
        };

        let input_camera = match attrs.get("input_camera") {
            None => return Err(invalid("input_camera is required")),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(invalid("input_camera must be a string")),
        };

        let required_diff = match attrs.get("required_diff") {
            None => DEFAULT_REQUIRED_DIFF,
            Some(Value::Number(n)) => {
                let v = n
                    .as_f64()
                    .ok_or_else(|| invalid("required_diff must be a number"))?;
                if !(0.0..=1.0).contains(&v) {
                    return Err(invalid("required_diff must be between 0 and 1"));
                }
                v
            }
            Some(_) => return Err(invalid("required_diff must be a number")),
        };

        Ok(Self {
            image_memories,
            input_camera,
            required_diff,
        })
    }

    /// Names of the resources this service needs the host to provide.
    pub fn dependencies(&self) -> Vec<String> {
        vec![self.input_camera.clone()]
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// Default value functions
fn default_service_name() -> String {
    "pixel-diff".into()
}
fn default_camera_timeout() -> u64 {
    10
}
fn default_fps() -> f64 {
    2.0
}
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn minimal_attributes_use_default_diff() {
        let parsed = DiffAttributes::from_attributes(&attrs(json!({
            "image_memories": 3,
            "input_camera": "front",
        })))
        .unwrap();
        assert_eq!(parsed.image_memories, 3);
        assert_eq!(parsed.input_camera, "front");
        assert_eq!(parsed.required_diff, DEFAULT_REQUIRED_DIFF);
        assert_eq!(parsed.dependencies(), vec!["front".to_string()]);
    }

    #[test]
    fn integer_required_diff_is_accepted() {
        let parsed = DiffAttributes::from_attributes(&attrs(json!({
            "image_memories": 1,
            "input_camera": "front",
            "required_diff": 1,
        })))
        .unwrap();
        assert_eq!(parsed.required_diff, 1.0);
    }

    #[test]
    fn rejects_bad_image_memories() {
        for bad in [json!(0), json!(-2), json!(2.5), json!("3"), json!(true)] {
            let err = DiffAttributes::from_attributes(&attrs(json!({
                "image_memories": bad,
                "input_camera": "front",
            })))
            .unwrap_err();
            assert!(
                err.to_string().contains("image_memories"),
                "unexpected error for {bad}: {err}"
            );
        }

        let err = DiffAttributes::from_attributes(&attrs(json!({ "input_camera": "front" })))
            .unwrap_err();
        assert!(err.to_string().contains("image_memories is required"));
    }

    #[test]
    fn rejects_bad_input_camera() {
        let err = DiffAttributes::from_attributes(&attrs(json!({ "image_memories": 2 })))
            .unwrap_err();
        assert!(err.to_string().contains("input_camera is required"));

        let err = DiffAttributes::from_attributes(&attrs(json!({
            "image_memories": 2,
            "input_camera": 7,
        })))
        .unwrap_err();
        assert!(err.to_string().contains("input_camera must be a string"));
    }

    #[test]
    fn rejects_bad_required_diff() {
        for bad in [json!(-0.1), json!(1.5), json!("0.3"), json!(null)] {
            let err = DiffAttributes::from_attributes(&attrs(json!({
                "image_memories": 2,
                "input_camera": "front",
                "required_diff": bad,
            })))
            .unwrap_err();
            assert!(
                err.to_string().contains("required_diff"),
                "unexpected error for {bad}: {err}"
            );
        }
    }

    #[test]
    fn parse_full_toml() {
        let config = Config::parse(
            r#"
            [service]
            name = "door-watch"

            [service.attributes]
            image_memories = 4
            input_camera = "front"
            required_diff = 0.35

            [[cameras]]
            name = "front"
            url = "http://127.0.0.1:8000/frame"

            [watch]
            fps = 5.0

            [api]
            port = 9090
            "#,
        )
        .unwrap();

        assert_eq!(config.service.name, "door-watch");
        assert_eq!(config.cameras.len(), 1);
        assert_eq!(config.cameras[0].timeout_secs, 10);
        assert_eq!(config.watch.fps, 5.0);
        assert_eq!(config.api.port, 9090);
        assert_eq!(config.api.bind, "0.0.0.0");
        assert_eq!(config.logging.level, "info");
        assert!(config.camera("front").is_some());

        let attrs = DiffAttributes::from_attributes(&config.service.attributes).unwrap();
        assert_eq!(attrs.image_memories, 4);
        assert_eq!(attrs.required_diff, 0.35);
    }

    #[test]
    fn example_config_is_valid() {
        let config = Config::parse(include_str!("../../config.example.toml")).unwrap();
        assert_eq!(config.service.name, "pixel-diff");
        assert!(config.camera("front").is_some());
    }

    #[test]
    fn parse_rejects_undeclared_camera() {
        let err = Config::parse(
            r#"
            [service.attributes]
            image_memories = 4
            input_camera = "rear"

            [[cameras]]
            name = "front"
            url = "http://127.0.0.1:8000/frame"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("rear"));
    }

    #[test]
    fn parse_rejects_out_of_range_fps() {
        for fps in ["0.0", "-1.0", "1e-20", "inf", "nan", "1e9"] {
            let err = Config::parse(&format!(
                r#"
                [service.attributes]
                image_memories = 2
                input_camera = "front"

                [[cameras]]
                name = "front"
                url = "http://127.0.0.1:8000/frame"

                [watch]
                fps = {fps}
                "#
            ))
            .unwrap_err();
            assert!(err.to_string().contains("watch.fps"), "fps = {fps}: {err}");
        }
    }

    #[test]
    fn parse_rejects_float_image_memories_from_toml() {
        let err = Config::parse(
            r#"
            [service.attributes]
            image_memories = 2.0
            input_camera = "front"

            [[cameras]]
            name = "front"
            url = "http://127.0.0.1:8000/frame"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("positive integer"));
    }
}
