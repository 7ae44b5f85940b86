pub mod diff;

use image::{DynamicImage, ImageError, ImageFormat, ImageReader};
use pixel_diff_common::frame::EncodedImage;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Cursor;
use tracing::{debug, info};

use diff::normalized_difference;

/// Label reported when an image differs from every remembered reference.
pub const SIGNIFICANT_CHANGE: &str = "significant_change";

/// A single detection. The engine only ever reports [`SIGNIFICANT_CHANGE`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
}

impl Detection {
    fn significant_change() -> Self {
        Self {
            label: SIGNIFICANT_CHANGE.to_string(),
            confidence: 1.0,
        }
    }
}

/// What happened to memory during one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// Memory was empty; the image became the first reference.
    Bootstrapped,
    /// The image was within the threshold of the reference at `index`.
    TooSimilar { index: usize, score: f64 },
    /// The image differed from every reference and was stored.
    Stored { evicted: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub changed: bool,
    pub outcome: Outcome,
    pub detections: Vec<Detection>,
}

impl Evaluation {
    fn unchanged(outcome: Outcome) -> Self {
        Self {
            changed: false,
            outcome,
            detections: Vec::new(),
        }
    }
}

/// Receives the score of every comparison the engine performs, in order.
pub trait ComparisonObserver: Send {
    fn on_comparison(&mut self, index: usize, score: f64);
}

impl<F> ComparisonObserver for F
where
    F: FnMut(usize, f64) + Send,
{
    fn on_comparison(&mut self, index: usize, score: f64) {
        self(index, score)
    }
}

/// Rolling memory of reference images, oldest first.
#[derive(Debug, Clone)]
pub struct ReferenceMemory {
    images: VecDeque<DynamicImage>,
    capacity: usize,
    threshold: f64,
}

impl ReferenceMemory {
    fn new(capacity: usize, threshold: f64) -> Result<Self, EngineError> {
        if capacity < 1 {
            return Err(EngineError::InvalidConfiguration(
                "capacity must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EngineError::InvalidConfiguration(format!(
                "threshold must be between 0 and 1, got {threshold}"
            )));
        }
        Ok(Self {
            images: VecDeque::new(),
            capacity,
            threshold,
        })
    }

    /// Append as newest, evicting the oldest first when full.
    /// Returns `true` if an image was evicted.
    fn push(&mut self, image: DynamicImage) -> bool {
        let evicted = if self.images.len() >= self.capacity {
            self.images.pop_front().is_some()
        } else {
            false
        };
        self.images.push_back(image);
        evicted
    }
}

/// Change detector over a bounded set of remembered images.
///
/// An image counts as a change only when its normalized difference from
/// *every* reference is at least `threshold`. Changed images are remembered
/// (FIFO eviction at capacity); similar images leave memory untouched. The
/// first image seen on empty memory is stored but never reported.
///
/// The engine is synchronous and not internally locked. Hosts must serialize
/// calls on a given instance.
pub struct DifferenceEngine {
    memory: ReferenceMemory,
    observer: Option<Box<dyn ComparisonObserver>>,
}

impl DifferenceEngine {
    pub fn new(capacity: usize, threshold: f64) -> Result<Self, EngineError> {
        Ok(Self {
            memory: ReferenceMemory::new(capacity, threshold)?,
            observer: None,
        })
    }

    pub fn with_observer(mut self, observer: impl ComparisonObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Replace capacity and threshold. Always discards every stored image.
    pub fn configure(&mut self, capacity: usize, threshold: f64) -> Result<(), EngineError> {
        self.memory = ReferenceMemory::new(capacity, threshold)?;
        info!(capacity, threshold, "difference engine configured, memory reset");
        Ok(())
    }

    /// Decode `image` and evaluate it against memory.
    ///
    /// A decode failure leaves memory untouched.
    pub fn evaluate(&mut self, image: &EncodedImage) -> Result<Evaluation, EngineError> {
        let decoded = decode(image).map_err(EngineError::Decode)?;
        debug!(
            seq = image.seq,
            bytes = image.len(),
            width = decoded.width(),
            height = decoded.height(),
            "decoded image"
        );
        Ok(self.evaluate_decoded(decoded))
    }

    pub fn evaluate_decoded(&mut self, image: DynamicImage) -> Evaluation {
        if self.memory.images.is_empty() {
            info!("no previous images to compare against, storing first image");
            self.memory.images.push_back(image);
            return Evaluation::unchanged(Outcome::Bootstrapped);
        }

        let threshold = self.memory.threshold;
        for (index, reference) in self.memory.images.iter().enumerate() {
            let score = normalized_difference(&image, reference);
            debug!(
                index,
                score = format!("{:.4}", score),
                threshold = format!("{:.4}", threshold),
                "image difference with memory"
            );
            if let Some(observer) = self.observer.as_mut() {
                observer.on_comparison(index, score);
            }
            if score < threshold {
                info!(
                    index,
                    score = format!("{:.4}", score),
                    threshold = format!("{:.4}", threshold),
                    "image too similar to memory, not stored"
                );
                return Evaluation::unchanged(Outcome::TooSimilar { index, score });
            }
        }

        let evicted = self.memory.push(image);
        info!(
            evicted,
            stored = self.memory.images.len(),
            capacity = self.memory.capacity,
            "image different from all memories, stored"
        );
        Evaluation {
            changed: true,
            outcome: Outcome::Stored { evicted },
            detections: vec![Detection::significant_change()],
        }
    }

    /// Forget every reference image. Capacity and threshold are kept.
    pub fn clear_memory(&mut self) {
        let cleared = self.memory.images.len();
        self.memory.images.clear();
        info!(cleared, "image memories cleared");
    }

    pub fn len(&self) -> usize {
        self.memory.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.images.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.memory.capacity
    }

    pub fn threshold(&self) -> f64 {
        self.memory.threshold
    }

    /// Stored references, oldest first.
    pub fn references(&self) -> impl Iterator<Item = &DynamicImage> {
        self.memory.images.iter()
    }
}

/// Decode an encoded buffer into a raster image.
///
/// The format is sniffed from the payload; the MIME hint is only used when
/// sniffing finds nothing.
pub fn decode(image: &EncodedImage) -> Result<DynamicImage, ImageError> {
    let mut reader = ImageReader::new(Cursor::new(image.payload())).with_guessed_format()?;
    if reader.format().is_none() {
        if let Some(format) = image.essence().and_then(ImageFormat::from_mime_type) {
            reader.set_format(format);
        }
    }
    reader.decode()
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to decode image: {0}")]
    Decode(#[source] ImageError),
}
