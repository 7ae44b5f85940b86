use pixel_diff_common::config::{Attributes, ConfigError, DiffAttributes};
use pixel_diff_common::frame::EncodedImage;
use serde::Serialize;
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::camera::{Camera, CameraError, Dependencies};
use crate::engine::{Detection, DifferenceEngine, EngineError};

/// Custom command that wipes every remembered image.
pub const MEMORY_ERASURE_COMMAND: &str = "targeted_memory_erasure";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub class_name: String,
    pub confidence: f64,
}

impl From<Detection> for Classification {
    fn from(d: Detection) -> Self {
        Self {
            class_name: d.label,
            confidence: d.confidence,
        }
    }
}

/// Which queries this service answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Properties {
    pub classifications_supported: bool,
    pub detections_supported: bool,
    pub object_point_clouds_supported: bool,
}

struct Configured {
    attributes: DiffAttributes,
    camera: Arc<dyn Camera>,
    engine: DifferenceEngine,
}

/// Pixel-difference vision service.
///
/// Every call that touches memory goes through one async mutex, so
/// evaluations, memory erasure and reconfiguration never interleave on the
/// same instance. Camera captures happen outside the lock, and decoding and
/// comparison run on the blocking pool while the lock is held.
pub struct DiffVision {
    name: String,
    state: Arc<Mutex<Option<Configured>>>,
}

impl DiffVision {
    /// An unconfigured service. Image queries answer `NotReady` until
    /// [`reconfigure`](Self::reconfigure) succeeds.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn from_config(
        name: impl Into<String>,
        attributes: &Attributes,
        deps: &Dependencies,
    ) -> Result<Self, ServiceError> {
        let service = Self::new(name);
        service.reconfigure(attributes, deps).await?;
        Ok(service)
    }

    /// Validate raw attributes, returning the names of required dependencies.
    pub fn validate_config(attributes: &Attributes) -> Result<Vec<String>, ServiceError> {
        Ok(DiffAttributes::from_attributes(attributes)?.dependencies())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply a new configuration. Memory is always reset, even if capacity and
    /// threshold are unchanged.
    pub async fn reconfigure(
        &self,
        attributes: &Attributes,
        deps: &Dependencies,
    ) -> Result<(), ServiceError> {
        let attributes = DiffAttributes::from_attributes(attributes)?;
        let camera = deps.get(&attributes.input_camera).cloned().ok_or_else(|| {
            ServiceError::InvalidConfiguration(format!(
                "input camera {} not found in dependencies",
                attributes.input_camera
            ))
        })?;
        let engine = DifferenceEngine::new(attributes.image_memories, attributes.required_diff)?;

        info!(
            service = self.name,
            input_camera = attributes.input_camera,
            image_memories = attributes.image_memories,
            required_diff = attributes.required_diff,
            "service reconfigured"
        );

        *self.state.lock().await = Some(Configured {
            attributes,
            camera,
            engine,
        });
        Ok(())
    }

    /// Report a `significant_change` detection if `image` differs enough from
    /// every remembered image.
    pub async fn detections(&self, image: &EncodedImage) -> Result<Vec<Detection>, ServiceError> {
        let mut state = Arc::clone(&self.state).lock_owned().await;
        if state.is_none() {
            return Err(ServiceError::NotReady);
        }
        let image = image.clone();
        let result = tokio::task::spawn_blocking(move || {
            let configured = state.as_mut().ok_or(ServiceError::NotReady)?;
            Ok::<_, ServiceError>(configured.engine.evaluate(&image)?)
        })
        .await;
        let evaluation = match result {
            Ok(evaluation) => evaluation?,
            Err(e) => {
                error!(error = %e, "spawn_blocking failed");
                return Err(ServiceError::Evaluation(e.to_string()));
            }
        };
        debug!(
            service = self.name,
            changed = evaluation.changed,
            outcome = ?evaluation.outcome,
            "evaluated image"
        );
        Ok(evaluation.detections)
    }

    /// Capture from the input camera and run [`detections`](Self::detections).
    pub async fn detections_from_camera(
        &self,
        camera_name: &str,
    ) -> Result<Vec<Detection>, ServiceError> {
        let camera = self.input_camera(camera_name).await?;
        let image = camera.capture().await?;
        self.detections(&image).await
    }

    /// Same decision as [`detections`](Self::detections), shaped as
    /// classifications. `count` cannot raise the result above one entry.
    pub async fn classifications(
        &self,
        image: &EncodedImage,
        count: usize,
    ) -> Result<Vec<Classification>, ServiceError> {
        debug!(count, "classification count is capped at one result");
        let detections = self.detections(image).await?;
        Ok(detections.into_iter().map(Classification::from).collect())
    }

    pub async fn classifications_from_camera(
        &self,
        camera_name: &str,
        count: usize,
    ) -> Result<Vec<Classification>, ServiceError> {
        let camera = self.input_camera(camera_name).await?;
        let image = camera.capture().await?;
        self.classifications(&image, count).await
    }

    pub async fn object_point_clouds(&self, camera_name: &str) -> Result<Infallible, ServiceError> {
        debug!(camera = camera_name, "point cloud query rejected");
        Err(ServiceError::Unsupported("point clouds"))
    }

    pub async fn geometries(&self) -> Result<Infallible, ServiceError> {
        error!("`geometries` is not implemented");
        Err(ServiceError::Unsupported("geometries"))
    }

    pub fn properties(&self) -> Properties {
        Properties {
            classifications_supported: true,
            detections_supported: true,
            object_point_clouds_supported: false,
        }
    }

    /// Handle a custom command. Unknown commands answer with an error status
    /// instead of failing.
    pub async fn do_command(&self, command: &Map<String, Value>) -> Map<String, Value> {
        if command.contains_key(MEMORY_ERASURE_COMMAND) {
            self.clear_memory().await;
            return status("success", "All image memories cleared");
        }
        warn!(keys = ?command.keys().collect::<Vec<_>>(), "unknown command");
        status("error", "Unknown command")
    }

    /// Forget every remembered image. A no-op when unconfigured.
    pub async fn clear_memory(&self) {
        if let Some(configured) = self.state.lock().await.as_mut() {
            configured.engine.clear_memory();
        }
    }

    /// Number of remembered images (0 when unconfigured).
    pub async fn memory_len(&self) -> usize {
        self.state
            .lock()
            .await
            .as_ref()
            .map_or(0, |c| c.engine.len())
    }

    async fn input_camera(&self, camera_name: &str) -> Result<Arc<dyn Camera>, ServiceError> {
        let state = self.state.lock().await;
        let configured = state.as_ref().ok_or(ServiceError::NotReady)?;
        if configured.attributes.input_camera != camera_name {
            return Err(ServiceError::UnknownCamera(camera_name.to_string()));
        }
        Ok(Arc::clone(&configured.camera))
    }
}

fn status(status: &str, message: &str) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("status".into(), Value::String(status.into()));
    out.insert("message".into(), Value::String(message.into()));
    out
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("input camera not set")]
    NotReady,
    #[error("{0} not supported by pixel diff vision service")]
    Unsupported(&'static str),
    #[error("camera {0} is not the configured input camera")]
    UnknownCamera(String),
    #[error("camera capture failed: {0}")]
    Camera(#[from] CameraError),
    #[error("image evaluation task failed: {0}")]
    Evaluation(String),
}

impl From<ConfigError> for ServiceError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Invalid(msg) => ServiceError::InvalidConfiguration(msg),
            other => ServiceError::InvalidConfiguration(other.to_string()),
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidConfiguration(msg) => ServiceError::InvalidConfiguration(msg),
            EngineError::Decode(e) => ServiceError::Decode(e),
        }
    }
}
