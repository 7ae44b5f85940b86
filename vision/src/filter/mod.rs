pub mod pixel_diff;
pub mod traits;

pub use traits::FrameFilter;
