use ndarray::{Array2, Zip};

use crate::imgproc::{filter2d, resize_nearest, rgb_to_gray, rgb_to_hsv, Mask, RgbFrame};

/// 5x5 inverted Laplacian-of-Gaussian: positive response on bright blobs.
const LOG_KERNEL: [[f32; 5]; 5] = [
    [-0.0239, -0.0460, -0.0499, -0.0460, -0.0239],
    [-0.0460, -0.0061, 0.0923, -0.0061, -0.0460],
    [-0.0499, 0.0923, 0.3182, 0.0923, -0.0499],
    [-0.0460, -0.0061, 0.0923, -0.0061, -0.0460],
    [-0.0239, -0.0460, -0.0499, -0.0460, -0.0239],
];

/// Classifies the scene by hue and brightness statistics: artificial road
/// lighting pushes hues toward red while bright pixels become rare.
pub fn is_night(frame: &RgbFrame) -> bool {
    static THRESHOLD_RED: f32 = 0.75;
    static THRESHOLD_BRIGHT: f32 = 0.15;

    let (hue, _sat, val) = rgb_to_hsv(frame);
    let total = val.len() as f32;
    if total == 0.0 {
        return false;
    }

    let red = hue
        .iter()
        .filter(|&&h| h < 1.0 / 6.0 || h > 5.0 / 6.0)
        .count() as f32;
    let bright = val.iter().filter(|&&v| v > 0.5).count() as f32;

    red / total > THRESHOLD_RED && bright / total < THRESHOLD_BRIGHT
}

/// Bright compact blobs (headlights) found by thresholding the gray image
/// and running the blob filter across four downscaled octaves; per-octave
/// hits are upscaled back and unioned, then clipped to the bright pixels.
pub fn detect_headlights(frame: &RgbFrame) -> Mask {
    static MONOCHROME_THRESHOLD: f32 = 200.0 / 255.0;
    static RESPONSE_THRESHOLD: f32 = 100.0 / 255.0;
    static OCTAVES: usize = 4;

    let gray = rgb_to_gray(frame);
    let bright = gray.mapv(|v| v > MONOCHROME_THRESHOLD);
    let binary = bright.mapv(|v| if v { 1.0f32 } else { 0.0 });
    let kernel = Array2::from_shape_fn((5, 5), |(r, c)| LOG_KERNEL[r][c]);

    let (h, w) = gray.dim();
    let mut blobs = Mask::from_elem((h, w), false);
    for level in 1..=OCTAVES {
        let (sh, sw) = (h >> level, w >> level);
        if sh == 0 || sw == 0 {
            break;
        }
        let reduced = resize_nearest(&binary, sh, sw);
        let response = filter2d(&reduced, &kernel);
        let detected = response.mapv(|v| v > RESPONSE_THRESHOLD);
        let up = resize_nearest(&detected, h, w);
        Zip::from(&mut blobs).and(&up).for_each(|b, &u| *b = *b || u);
    }

    Zip::from(&mut blobs)
        .and(&bright)
        .for_each(|b, &m| *b = *b && m);
    blobs
}

/// Cast-shadow signature against the background: the value dims into a
/// band below one, saturation rises a little and hue barely moves.
pub fn shadow_mask(frame: &RgbFrame, background: &RgbFrame) -> Mask {
    static MIN_DIMMING: f32 = 0.1;
    static MAX_DIMMING: f32 = 0.5;
    static MIN_SATURATION_RISE: f32 = 0.05;
    static MAX_HUE_DISTANCE: f32 = 0.45;

    let (hue_f, sat_f, val_f) = rgb_to_hsv(frame);
    let (hue_b, sat_b, val_b) = rgb_to_hsv(background);

    let (h, w) = val_f.dim();
    Mask::from_shape_fn((h, w), |(r, c)| {
        let back = val_b[[r, c]];
        if back <= f32::EPSILON {
            return false;
        }
        let dimming = 1.0 - val_f[[r, c]] / back;
        dimming > MIN_DIMMING
            && dimming < MAX_DIMMING
            && sat_f[[r, c]] - sat_b[[r, c]] > MIN_SATURATION_RISE
            && hue_distance(hue_f[[r, c]], hue_b[[r, c]]) < MAX_HUE_DISTANCE
    })
}

#[inline]
fn hue_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs();
    d.min(1.0 - d)
}
