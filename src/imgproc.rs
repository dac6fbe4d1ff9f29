use ndarray::{s, Array2, Array3, Zip};
use num_traits::Float;
use std::ops::Range;

use crate::Id;

/// RGB frame, shape `(rows, cols, 3)`, channel values in `[0, 1]`.
pub type RgbFrame = Array3<f32>;
/// Single-channel image, shape `(rows, cols)`.
pub type GrayImage = Array2<f32>;
/// Boolean pixel mask, shape `(rows, cols)`.
pub type Mask = Array2<bool>;
/// Per-pixel or per-block object id map.
pub type LabelMap = Array2<Id>;

pub fn rgb_to_gray(frame: &RgbFrame) -> GrayImage {
    let (h, w, _) = frame.dim();
    Array2::from_shape_fn((h, w), |(r, c)| {
        0.299 * frame[[r, c, 0]] + 0.587 * frame[[r, c, 1]] + 0.114 * frame[[r, c, 2]]
    })
}

/// Splits a frame into hue, saturation and value planes. Hue is normalized
/// to `[0, 1)` and is 0 for achromatic pixels.
pub fn rgb_to_hsv(frame: &RgbFrame) -> (GrayImage, GrayImage, GrayImage) {
    let (h, w, _) = frame.dim();
    let mut hue = GrayImage::zeros((h, w));
    let mut sat = GrayImage::zeros((h, w));
    let mut val = GrayImage::zeros((h, w));

    for r in 0..h {
        for c in 0..w {
            let (ph, ps, pv) = pixel_hsv(frame[[r, c, 0]], frame[[r, c, 1]], frame[[r, c, 2]]);
            hue[[r, c]] = ph;
            sat[[r, c]] = ps;
            val[[r, c]] = pv;
        }
    }

    (hue, sat, val)
}

#[inline]
fn pixel_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        let h = ((g - b) / delta) / 6.0;
        if h < 0.0 {
            h + 1.0
        } else {
            h
        }
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };

    (h, s, v)
}

/// Majority filter over a `(2·radius+1)²` window, clipped at the borders.
/// Ties resolve to `false`, so speckle noise is suppressed rather than grown.
pub fn median_filter_bool(mask: &Mask, radius: usize) -> Mask {
    let (h, w) = mask.dim();
    let mut integral = Array2::<u32>::zeros((h + 1, w + 1));
    for r in 0..h {
        for c in 0..w {
            integral[[r + 1, c + 1]] = integral[[r, c + 1]] + integral[[r + 1, c]]
                - integral[[r, c]]
                + mask[[r, c]] as u32;
        }
    }

    Array2::from_shape_fn((h, w), |(r, c)| {
        let r0 = r.saturating_sub(radius);
        let c0 = c.saturating_sub(radius);
        let r1 = (r + radius + 1).min(h);
        let c1 = (c + radius + 1).min(w);
        let set = integral[[r1, c1]] + integral[[r0, c0]] - integral[[r0, c1]] - integral[[r1, c0]];
        2 * set > ((r1 - r0) * (c1 - c0)) as u32
    })
}

/// Correlates `img` with `kernel`, replicating edge pixels outside the border.
pub fn filter2d<T: Float>(img: &Array2<T>, kernel: &Array2<T>) -> Array2<T> {
    let (h, w) = img.dim();
    let (kh, kw) = kernel.dim();
    let (ar, ac) = ((kh / 2) as isize, (kw / 2) as isize);

    Array2::from_shape_fn((h, w), |(r, c)| {
        let mut acc = T::zero();
        for kr in 0..kh {
            for kc in 0..kw {
                let rr = (r as isize + kr as isize - ar).clamp(0, h as isize - 1) as usize;
                let cc = (c as isize + kc as isize - ac).clamp(0, w as isize - 1) as usize;
                acc = acc + kernel[[kr, kc]] * img[[rr, cc]];
            }
        }
        acc
    })
}

pub fn resize_nearest<T: Copy>(img: &Array2<T>, rows: usize, cols: usize) -> Array2<T> {
    let (h, w) = img.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| img[[r * h / rows, c * w / cols]])
}

/// Fraction of set pixels inside the given window.
pub fn region_fraction(mask: &Mask, rows: Range<usize>, cols: Range<usize>) -> f32 {
    let view = mask.slice(s![rows, cols]);
    let total = view.len();
    if total == 0 {
        return 0.0;
    }
    let set = view.iter().filter(|&&v| v).count();
    set as f32 / total as f32
}

/// Maximum absolute response over four oriented Sobel kernels, i.e. the
/// strongest of eight compass gradients per pixel.
pub fn edge_image(gray: &GrayImage) -> GrayImage {
    const KERNELS: [[[f32; 3]; 3]; 4] = [
        [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]],
        [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]],
        [[0.0, 1.0, 2.0], [-1.0, 0.0, 1.0], [-2.0, -1.0, 0.0]],
        [[-2.0, -1.0, 0.0], [-1.0, 0.0, 1.0], [0.0, 1.0, 2.0]],
    ];

    let mut out = GrayImage::zeros(gray.dim());
    for k in KERNELS.iter() {
        let kernel = Array2::from_shape_fn((3, 3), |(r, c)| k[r][c]);
        let resp = filter2d(gray, &kernel);
        Zip::from(&mut out).and(&resp).for_each(|o, &r| *o = o.max(r.abs()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn gray_weights() {
        let mut frame = RgbFrame::zeros((1, 2, 3));
        frame[[0, 0, 0]] = 1.0;
        frame[[0, 1, 1]] = 1.0;
        let gray = rgb_to_gray(&frame);
        assert!((gray[[0, 0]] - 0.299).abs() < 1e-6);
        assert!((gray[[0, 1]] - 0.587).abs() < 1e-6);
    }

    #[test]
    fn hsv_fixed_points() {
        let mut frame = RgbFrame::zeros((1, 3, 3));
        // pure red
        frame[[0, 0, 0]] = 1.0;
        // pure green
        frame[[0, 1, 1]] = 1.0;
        // mid gray
        frame.slice_mut(s![0, 2, ..]).fill(0.5);

        let (h, s, v) = rgb_to_hsv(&frame);
        assert_eq!(h[[0, 0]], 0.0);
        assert_eq!(s[[0, 0]], 1.0);
        assert_eq!(v[[0, 0]], 1.0);
        assert!((h[[0, 1]] - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(s[[0, 2]], 0.0);
        assert_eq!(v[[0, 2]], 0.5);
    }

    #[test]
    fn median_removes_lone_pixel_keeps_solid_region() {
        let mut mask = Mask::from_elem((5, 5), false);
        mask[[2, 2]] = true;
        let filtered = median_filter_bool(&mask, 1);
        assert!(!filtered[[2, 2]]);

        let solid = Mask::from_elem((5, 5), true);
        let filtered = median_filter_bool(&solid, 1);
        assert!(filtered.iter().all(|&v| v));
    }

    #[test]
    fn resize_nearest_downscale_picks_grid_points() {
        let img = array![
            [0.0, 1.0, 2.0, 3.0],
            [4.0, 5.0, 6.0, 7.0],
            [8.0, 9.0, 10.0, 11.0],
            [12.0, 13.0, 14.0, 15.0],
        ];
        let small = resize_nearest(&img, 2, 2);
        assert_eq!(small, array![[0.0, 2.0], [8.0, 10.0]]);

        let same = resize_nearest(&img, 4, 4);
        assert_eq!(same, img);
    }

    #[test]
    fn filter2d_identity_kernel() {
        let img = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let kernel = array![[0.0f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        assert_eq!(filter2d(&img, &kernel), img);
    }

    #[test]
    fn region_fraction_counts_window_only() {
        let mut mask = Mask::from_elem((4, 4), false);
        mask[[0, 0]] = true;
        mask[[1, 1]] = true;
        assert!((region_fraction(&mask, 0..2, 0..2) - 0.5).abs() < 1e-6);
        assert_eq!(region_fraction(&mask, 2..4, 2..4), 0.0);
        assert_eq!(region_fraction(&mask, 2..2, 0..4), 0.0);
    }

    #[test]
    fn edge_image_peaks_at_step() {
        let mut gray = GrayImage::zeros((6, 6));
        gray.slice_mut(s![.., 3..]).fill(1.0);
        let edges = edge_image(&gray);
        // max Sobel response across a unit step is 4
        assert!((edges[[2, 2]] - 4.0).abs() < 1e-6);
        assert!((edges[[2, 3]] - 4.0).abs() < 1e-6);
        assert_eq!(edges[[2, 0]], 0.0);
        assert_eq!(edges[[2, 5]], 0.0);
    }
}
