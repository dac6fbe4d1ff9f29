use tracing::debug;

use crate::error::{Error, Result};
use crate::imgproc::{median_filter_bool, Mask, RgbFrame};

/// Pixels whose color moved by more than `threshold` in any channel.
/// Shapes must match.
pub fn subtract_background(frame: &RgbFrame, background: &RgbFrame, threshold: f32) -> Mask {
    let (h, w, _) = frame.dim();
    Mask::from_shape_fn((h, w), |(r, c)| {
        (0..3).any(|ch| (frame[[r, c, ch]] - background[[r, c, ch]]).abs() > threshold)
    })
}

/// Blends the frame into the background by `weight`, but only where the
/// median-filtered change mask reports a stable pixel. Moving objects
/// therefore leave the background untouched while lighting drift is absorbed.
pub fn update_background_weighted(
    background: &mut RgbFrame,
    frame: &RgbFrame,
    threshold: f32,
    weight: f32,
) -> Result<()> {
    if frame.dim() != background.dim() {
        return Err(Error::ShapeMismatch(format!(
            "frame is {:?}, background is {:?}",
            frame.dim(),
            background.dim()
        )));
    }

    let changed = subtract_background(frame, background, threshold);
    let stable = median_filter_bool(&changed.mapv(|v| !v), 5);

    let (h, w, _) = frame.dim();
    for r in 0..h {
        for c in 0..w {
            if !stable[[r, c]] {
                continue;
            }
            for ch in 0..3 {
                let b = background[[r, c, ch]];
                background[[r, c, ch]] = (1.0 - weight) * b + weight * frame[[r, c, ch]];
            }
        }
    }
    Ok(())
}

/// Averages an initial run of frames, then tightens the estimate with
/// forward and backward update sweeps at progressively stricter thresholds.
pub fn estimate_background(frames: &[RgbFrame], weight: f32, refine_passes: usize) -> Result<RgbFrame> {
    const REFINE_THRESHOLDS: [f32; 3] = [0.2, 0.1, 0.05];

    let first = frames.first().ok_or(Error::EmptySource)?;
    let dim = first.dim();

    let mut background = RgbFrame::zeros(dim);
    for frame in frames {
        if frame.dim() != dim {
            return Err(Error::ShapeMismatch(format!(
                "frame is {:?}, expected {:?}",
                frame.dim(),
                dim
            )));
        }
        background += frame;
    }
    background /= frames.len() as f32;

    for &threshold in REFINE_THRESHOLDS.iter().take(refine_passes) {
        for frame in frames {
            update_background_weighted(&mut background, frame, threshold, weight)?;
        }
        for frame in frames.iter().rev() {
            update_background_weighted(&mut background, frame, threshold, weight)?;
        }
        debug!(threshold, "background refinement pass done");
    }

    Ok(background)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    #[test]
    fn subtraction_is_any_channel() {
        let background = RgbFrame::from_elem((2, 2, 3), 0.5);
        let mut frame = background.clone();
        frame[[0, 0, 2]] = 0.8;
        let mask = subtract_background(&frame, &background, 0.1);
        assert!(mask[[0, 0]]);
        assert!(!mask[[0, 1]]);
    }

    #[test]
    fn update_blends_stable_and_freezes_changed() {
        let mut background = RgbFrame::from_elem((8, 30, 3), 0.5);
        let mut frame = RgbFrame::from_elem((8, 30, 3), 0.52);
        // right half changes far past the threshold
        frame.slice_mut(s![.., 15.., ..]).fill(1.0);

        update_background_weighted(&mut background, &frame, 0.1, 0.5).unwrap();

        // deep in the stable half: moved toward the frame by exactly the weight
        assert!((background[[4, 2, 0]] - 0.51).abs() < 1e-6);
        // deep in the changed half: untouched
        assert!((background[[4, 27, 0]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn update_rejects_shape_mismatch() {
        let mut background = RgbFrame::zeros((4, 4, 3));
        let frame = RgbFrame::zeros((4, 5, 3));
        assert!(matches!(
            update_background_weighted(&mut background, &frame, 0.1, 0.5),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn estimate_averages_and_is_stable_on_constant_input() {
        let frames = vec![
            RgbFrame::from_elem((4, 4, 3), 0.2),
            RgbFrame::from_elem((4, 4, 3), 0.4),
        ];
        let background = estimate_background(&frames, 0.05, 0).unwrap();
        assert!((background[[0, 0, 0]] - 0.3).abs() < 1e-6);

        let constant = vec![RgbFrame::from_elem((4, 4, 3), 0.7); 3];
        let background = estimate_background(&constant, 0.05, 3).unwrap();
        assert!((background[[2, 2, 1]] - 0.7).abs() < 1e-5);
    }

    #[test]
    fn estimate_requires_frames() {
        assert!(matches!(
            estimate_background(&[], 0.05, 3),
            Err(Error::EmptySource)
        ));
    }
}
