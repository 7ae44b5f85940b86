use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView};
use std::borrow::Cow;

/// Largest per-sample intensity for 8-bit channels.
pub const MAX_INTENSITY: f64 = 255.0;

/// Filter used when two images have to be brought to the same dimensions.
pub const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// Normalized pixel difference between two images, in `[0, 1]`.
///
/// Algorithm:
/// 1. If the dimensions differ, resize the image with more pixels down to the
///    dimensions of the other one (ties resize `b`)
/// 2. Convert both to 8-bit samples in their richest common layout
///    (gray, gray+alpha, RGB or RGBA)
/// 3. Mean absolute difference over every sample, divided by 255
///
/// For images of equal dimensions the result is symmetric in `a` and `b`.
pub fn normalized_difference(a: &DynamicImage, b: &DynamicImage) -> f64 {
    let (a, b) = match_dimensions(a, b);
    let layout = Layout::common(a.color(), b.color());
    let sa = layout.samples(&a);
    let sb = layout.samples(&b);
    mean_abs_diff(&sa, &sb) / MAX_INTENSITY
}

fn match_dimensions<'a>(
    a: &'a DynamicImage,
    b: &'a DynamicImage,
) -> (Cow<'a, DynamicImage>, Cow<'a, DynamicImage>) {
    let (w1, h1) = a.dimensions();
    let (w2, h2) = b.dimensions();
    if (w1, h1) == (w2, h2) {
        return (Cow::Borrowed(a), Cow::Borrowed(b));
    }

    if u64::from(w1) * u64::from(h1) > u64::from(w2) * u64::from(h2) {
        (
            Cow::Owned(a.resize_exact(w2, h2, RESIZE_FILTER)),
            Cow::Borrowed(b),
        )
    } else {
        (
            Cow::Borrowed(a),
            Cow::Owned(b.resize_exact(w1, h1, RESIZE_FILTER)),
        )
    }
}

fn mean_abs_diff(a: &[u8], b: &[u8]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 0.0;
    }
    let total: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (f64::from(x) - f64::from(y)).abs())
        .sum();
    total / a.len() as f64
}

/// 8-bit sample layout both images are compared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Luma,
    LumaAlpha,
    Rgb,
    Rgba,
}

impl Layout {
    fn common(a: ColorType, b: ColorType) -> Self {
        let color = a.has_color() || b.has_color();
        let alpha = a.has_alpha() || b.has_alpha();
        match (color, alpha) {
            (false, false) => Layout::Luma,
            (false, true) => Layout::LumaAlpha,
            (true, false) => Layout::Rgb,
            (true, true) => Layout::Rgba,
        }
    }

    fn samples<'a>(self, img: &'a DynamicImage) -> Cow<'a, [u8]> {
        match (self, img) {
            (Layout::Luma, DynamicImage::ImageLuma8(buf)) => Cow::Borrowed(buf.as_raw().as_slice()),
            (Layout::LumaAlpha, DynamicImage::ImageLumaA8(buf)) => Cow::Borrowed(buf.as_raw().as_slice()),
            (Layout::Rgb, DynamicImage::ImageRgb8(buf)) => Cow::Borrowed(buf.as_raw().as_slice()),
            (Layout::Rgba, DynamicImage::ImageRgba8(buf)) => Cow::Borrowed(buf.as_raw().as_slice()),
            (Layout::Luma, other) => Cow::Owned(other.to_luma8().into_raw()),
            (Layout::LumaAlpha, other) => Cow::Owned(other.to_luma_alpha8().into_raw()),
            (Layout::Rgb, other) => Cow::Owned(other.to_rgb8().into_raw()),
            (Layout::Rgba, other) => Cow::Owned(other.to_rgba8().into_raw()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::gray;
    use image::{Rgb, RgbImage};

    fn gradient(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8])
        }))
    }

    #[test]
    fn identical_images_score_zero() {
        let img = gradient(12, 9);
        assert_eq!(normalized_difference(&img, &img.clone()), 0.0);
    }

    #[test]
    fn black_and_white_score_one() {
        assert_eq!(normalized_difference(&gray(4, 4, 0), &gray(4, 4, 255)), 1.0);
    }

    #[test]
    fn uniform_offset_is_exact() {
        // 51 / 255 == 0.2
        let d = normalized_difference(&gray(5, 3, 100), &gray(5, 3, 151));
        assert_eq!(d, 0.2);
    }

    #[test]
    fn metric_is_symmetric() {
        let a = gradient(10, 10);
        let b = DynamicImage::ImageRgb8(RgbImage::from_fn(10, 10, |x, y| {
            Rgb([(y * 20) as u8, 255 - (x * 10) as u8, 40])
        }));
        assert_eq!(normalized_difference(&a, &b), normalized_difference(&b, &a));
    }

    #[test]
    fn mismatched_dimensions_are_comparable() {
        let small = gray(4, 4, 90);
        let large = gray(16, 12, 90);
        let d = normalized_difference(&small, &large);
        assert!((0.0..=1.0).contains(&d));
        assert!(d < 0.01, "uniform images should stay near zero after resize, got {d}");

        let d = normalized_difference(&gradient(20, 20), &gray(3, 7, 200));
        assert!((0.0..=1.0).contains(&d));
    }

    #[test]
    fn larger_image_is_resized_to_smaller() {
        let a = gray(8, 8, 10);
        let b = gray(2, 2, 10);
        let (ra, rb) = match_dimensions(&a, &b);
        assert_eq!(ra.dimensions(), (2, 2));
        assert!(matches!(rb, Cow::Borrowed(_)));

        let (ra, rb) = match_dimensions(&b, &a);
        assert!(matches!(ra, Cow::Borrowed(_)));
        assert_eq!(rb.dimensions(), (2, 2));
    }

    #[test]
    fn gray_and_color_compare_in_rgb() {
        assert_eq!(
            Layout::common(ColorType::L8, ColorType::Rgb8),
            Layout::Rgb
        );
        assert_eq!(
            Layout::common(ColorType::La8, ColorType::Rgb8),
            Layout::Rgba
        );
        assert_eq!(
            Layout::common(ColorType::L16, ColorType::L8),
            Layout::Luma
        );

        let g = gray(3, 3, 128);
        let c = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([128, 128, 128])));
        assert_eq!(normalized_difference(&g, &c), 0.0);
    }
}
