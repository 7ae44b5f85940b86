use pixel_diff_common::frame::EncodedImage;

/// Keep/skip interface for scene-change detection over a frame stream.
///
/// Implementations receive encoded frames and decide whether the frame
/// represents a meaningful change from what they have already seen.
pub trait FrameFilter: Send {
    /// Returns `true` if this frame should be stored (scene changed).
    /// Returns `false` to skip (scene unchanged or undecodable).
    fn should_store(&mut self, frame: &EncodedImage) -> bool;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
