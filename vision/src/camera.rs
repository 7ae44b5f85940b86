//! Image sources the vision service can depend on.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use pixel_diff_common::config::CameraConfig;
use pixel_diff_common::frame::EncodedImage;
use reqwest::header::CONTENT_TYPE;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

static SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A camera that produces one encoded frame per capture.
pub trait Camera: Send + Sync {
    /// Name the camera is registered under, e.g. `"front"`.
    fn name(&self) -> &str;

    /// Capture the next frame.
    fn capture(&self) -> BoxFuture<'_, Result<EncodedImage, CameraError>>;
}

/// Resources handed to the service by its host, keyed by name.
pub type Dependencies = HashMap<String, Arc<dyn Camera>>;

/// Camera that fetches a single frame per GET from an HTTP snapshot endpoint.
pub struct HttpCamera {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpCamera {
    pub fn new(config: &CameraConfig) -> Result<Self, CameraError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(CameraError::Client)?;
        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            client,
        })
    }

    async fn fetch(&self) -> Result<EncodedImage, CameraError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(CameraError::Http)?;

        if !resp.status().is_success() {
            return Err(CameraError::Status(resp.status().as_u16()));
        }

        let mime_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let payload = resp.bytes().await.map_err(CameraError::Http)?;
        let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);

        debug!(
            camera = self.name,
            seq,
            bytes = payload.len(),
            mime_type = mime_type.as_deref().unwrap_or("unknown"),
            "captured frame"
        );

        Ok(EncodedImage::new(payload, mime_type).with_seq(seq))
    }
}

impl Camera for HttpCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&self) -> BoxFuture<'_, Result<EncodedImage, CameraError>> {
        self.fetch().boxed()
    }
}

/// Build one [`HttpCamera`] per configured camera.
pub fn cameras_from_config(configs: &[CameraConfig]) -> Result<Dependencies, CameraError> {
    let mut deps = Dependencies::new();
    for config in configs {
        let camera: Arc<dyn Camera> = Arc::new(HttpCamera::new(config)?);
        deps.insert(config.name.clone(), camera);
    }
    Ok(deps)
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_config(name: &str) -> CameraConfig {
        CameraConfig {
            name: name.into(),
            url: "http://127.0.0.1:9/frame".into(),
            timeout_secs: 1,
        }
    }

    #[test]
    fn builds_one_camera_per_config() {
        let deps =
            cameras_from_config(&[camera_config("front"), camera_config("rear")]).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps["front"].name(), "front");
        assert_eq!(deps["rear"].name(), "rear");
    }

    #[tokio::test]
    async fn unreachable_camera_reports_http_error() {
        let camera = HttpCamera::new(&camera_config("front")).unwrap();
        let err = camera.capture().await.unwrap_err();
        assert!(matches!(err, CameraError::Http(_)));
    }
}
