use pixel_diff_common::frame::EncodedImage;
use tracing::warn;

use super::traits::FrameFilter;
use crate::engine::DifferenceEngine;

/// Drives the difference engine as a plain keep/skip filter.
///
/// The bootstrap frame is remembered but not kept, so a stream of identical
/// frames never yields a single stored frame.
impl FrameFilter for DifferenceEngine {
    fn should_store(&mut self, frame: &EncodedImage) -> bool {
        match self.evaluate(frame) {
            Ok(eval) => eval.changed,
            Err(e) => {
                warn!(error = %e, seq = frame.seq, "failed to decode frame for pixel diff, skipping");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "pixel-diff"
    }
}
