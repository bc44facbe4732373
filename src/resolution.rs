//! Resolution snapping.
//!
//! Images are generated at arbitrary sizes, often upscaled; reusing those
//! dimensions directly wastes time or trips model limits. Each base model
//! family has a set of officially supported resolutions, and snapping
//! picks the one whose aspect ratio is closest to the image's, falling
//! back to the smallest pixel-count difference on ratio ties.

/// SD 1.5 supported/popular resolutions: 512x512, 640x512, 768x512, 896x512.
/// Square images are generated at several sizes, handled separately.
const SD15_RESOLUTIONS: &[(f64, (u32, u32))] = &[
    (1.0000, (512, 512)),
    (1.2500, (640, 512)),
    (1.5000, (768, 512)),
    (1.7500, (896, 512)),
];

const SD15_SQUARE_SIZES: &[u32] = &[512, 640, 768];

/// SD 2.0/2.1 supported/popular resolutions.
const SD21_RESOLUTIONS: &[(f64, (u32, u32))] = &[
    (1.0000, (768, 768)),
    (1.1667, (896, 768)),
    (1.3333, (1024, 768)),
    (1.5000, (1152, 768)),
    (1.6667, (1280, 768)),
];

/// SDXL (and derivative) supported resolutions; also the fallback for
/// unknown base models.
const SDXL_RESOLUTIONS: &[(f64, (u32, u32))] = &[
    (1.0000, (1024, 1024)),
    (1.2857, (1152, 896)),
    (1.4615, (1216, 832)),
    (1.7500, (1344, 768)),
    (2.4000, (1536, 640)),
];

const RATIO_EPSILON: f64 = 1e-9;

/// Snap a width/height pair to the closest officially supported
/// resolution for the given base model family. Orientation is preserved;
/// invalid (zero) dimensions are returned unchanged.
pub fn snap_resolution(width: u32, height: u32, base_model: &str) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }

    let width_larger = width >= height;
    let aspect_ratio = if width_larger {
        f64::from(width) / f64::from(height)
    } else {
        f64::from(height) / f64::from(width)
    };
    let pixels = u64::from(width) * u64::from(height);

    let base = base_model.trim().to_lowercase();
    let table = if base.starts_with("sd 1.5") {
        SD15_RESOLUTIONS
    } else if base.starts_with("sd 2.1") {
        SD21_RESOLUTIONS
    } else {
        SDXL_RESOLUTIONS
    };

    let mut best = table[0].1;
    let mut best_ratio_delta = f64::MAX;
    let mut best_pixel_delta = u64::MAX;
    for &(ratio, resolution) in table {
        let ratio_delta = (ratio - aspect_ratio).abs();
        let pixel_delta = pixel_distance(resolution, pixels);
        let closer = ratio_delta < best_ratio_delta - RATIO_EPSILON;
        let tied = (ratio_delta - best_ratio_delta).abs() <= RATIO_EPSILON;
        if closer || (tied && pixel_delta < best_pixel_delta) {
            best = resolution;
            best_ratio_delta = ratio_delta;
            best_pixel_delta = pixel_delta;
        }
    }

    // square SD 1.5 images come in several common sizes
    if table.as_ptr() == SD15_RESOLUTIONS.as_ptr() && best.0 == best.1 {
        if let Some(&size) = SD15_SQUARE_SIZES
            .iter()
            .min_by_key(|&&size| pixel_distance((size, size), pixels))
        {
            best = (size, size);
        }
    }

    if width_larger {
        best
    } else {
        (best.1, best.0)
    }
}

fn pixel_distance(resolution: (u32, u32), pixels: u64) -> u64 {
    let candidate = u64::from(resolution.0) * u64::from(resolution.1);
    candidate.abs_diff(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdxl_landscape() {
        // 1920x1080 is 16:9; the closest official SDXL ratio is 1.75
        assert_eq!(snap_resolution(1920, 1080, "SDXL 1.0"), (1344, 768));
    }

    #[test]
    fn test_orientation_preserved() {
        assert_eq!(snap_resolution(1080, 1920, "SDXL 1.0"), (768, 1344));
    }

    #[test]
    fn test_sd15_square_sizes() {
        assert_eq!(snap_resolution(600, 600, "SD 1.5"), (640, 640));
        assert_eq!(snap_resolution(500, 500, "SD 1.5"), (512, 512));
        assert_eq!(snap_resolution(740, 740, "SD 1.5"), (768, 768));
    }

    #[test]
    fn test_sd15_landscape() {
        assert_eq!(snap_resolution(1536, 1024, "SD 1.5"), (768, 512));
    }

    #[test]
    fn test_sd21_prefix_match() {
        assert_eq!(snap_resolution(768, 768, "SD 2.1 768"), (768, 768));
        assert_eq!(snap_resolution(1300, 780, "SD 2.1"), (1280, 768));
    }

    #[test]
    fn test_unknown_base_uses_sdxl_table() {
        assert_eq!(snap_resolution(1000, 1000, "Pony"), (1024, 1024));
        assert_eq!(snap_resolution(1000, 1000, ""), (1024, 1024));
    }

    #[test]
    fn test_snapping_is_idempotent() {
        let (w, h) = snap_resolution(832, 1216, "SDXL 1.0");
        assert_eq!((w, h), (832, 1216));
        assert_eq!(snap_resolution(w, h, "SDXL 1.0"), (w, h));
    }

    #[test]
    fn test_zero_dimensions_untouched() {
        assert_eq!(snap_resolution(0, 512, "SD 1.5"), (0, 512));
        assert_eq!(snap_resolution(512, 0, "SD 1.5"), (512, 0));
    }
}
