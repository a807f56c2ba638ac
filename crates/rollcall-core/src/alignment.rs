//! Face alignment to a canonical 112×112 RGB crop.
//!
//! With landmarks, a 4-DOF similarity transform (scale, rotation, translation)
//! maps the five detected points onto the ArcFace reference positions. Without
//! landmarks, a padded square crop centred on the bounding box is resized to
//! the same size, so downstream extraction never sees which path ran.

use crate::frame::Frame;
use crate::resample;
use crate::types::{AlignedFace, AlignmentMethod, BoundingBox};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Padding around the bounding box, as a fraction of its longer side.
const CROP_PAD_RATIO: f32 = 0.3;
/// Fixed margin used when the centred square collapses after clamping.
const CROP_FALLBACK_MARGIN: f32 = 20.0;

/// Produce the canonical crop for a detected face.
pub fn align(frame: &Frame, face: &BoundingBox) -> AlignedFace {
    if let Some(landmarks) = face.landmarks.as_ref() {
        if let Some(matrix) = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112) {
            let data = warp_affine(frame, &matrix, ALIGNED_SIZE);
            return AlignedFace {
                data,
                size: ALIGNED_SIZE,
                method: AlignmentMethod::Landmarks,
            };
        }
        tracing::debug!("degenerate landmarks; falling back to padded crop");
    }

    AlignedFace {
        data: padded_crop(frame, face, ALIGNED_SIZE),
        size: ALIGNED_SIZE,
        method: AlignmentMethod::PaddedCrop,
    }
}

/// Estimate a 2×3 similarity transform from `src` landmarks to `dst` landmarks
/// using closed-form least squares on centred coordinates.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
/// `None` when the source points carry no spread (e.g. all landmarks coincide).
fn estimate_similarity_transform(
    src: &[(f32, f32); 5],
    dst: &[(f32, f32); 5],
) -> Option<[f32; 6]> {
    let n = src.len() as f64;
    let centroid = |pts: &[(f32, f32); 5]| -> (f64, f64) {
        let (sx, sy) = pts
            .iter()
            .fold((0.0f64, 0.0f64), |(ax, ay), &(x, y)| {
                (ax + x as f64, ay + y as f64)
            });
        (sx / n, sy / n)
    };
    let (msx, msy) = centroid(src);
    let (mdx, mdy) = centroid(dst);

    // Minimise sum |(a*sx - b*sy + tx, b*sx + a*sy + ty) - (dx, dy)|^2.
    let mut spread = 0.0f64;
    let mut dot = 0.0f64;
    let mut cross = 0.0f64;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx as f64 - msx, sy as f64 - msy);
        let (dx, dy) = (dx as f64 - mdx, dy as f64 - mdy);
        spread += sx * sx + sy * sy;
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
    }

    if spread < 1e-9 {
        return None;
    }

    let a = dot / spread;
    let b = cross / spread;
    if a * a + b * b < 1e-12 {
        return None;
    }
    let tx = mdx - (a * msx - b * msy);
    let ty = mdy - (b * msx + a * msy);

    let (a, b, tx, ty) = (a as f32, b as f32, tx as f32, ty as f32);
    Some([a, -b, tx, b, a, ty])
}

/// Apply a similarity warp to produce a square RGB output.
///
/// Uses bilinear interpolation. Out-of-bounds pixels are black.
fn warp_affine(frame: &Frame, matrix: &[f32; 6], out_size: usize) -> Vec<u8> {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // Invert the 2x2 part: M = [[a, -b], [b, a]], det = a^2 + b^2
    let inv_det = 1.0 / (a * a + b * b);
    let ia = a * inv_det;
    let ib = b * inv_det;

    let width = frame.width as usize;
    let height = frame.height as usize;
    let mut output = vec![0u8; out_size * out_size * 3];

    for oy in 0..out_size {
        for ox in 0..out_size {
            // src = M_inv * (dst - t)
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let px = resample::sample_bilinear(&frame.data, width, height, sx, sy);
            let dst = (oy * out_size + ox) * 3;
            for c in 0..3 {
                output[dst + c] = px[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    output
}

/// Square crop centred on the box, padded by [`CROP_PAD_RATIO`], resized to `out_size`.
fn padded_crop(frame: &Frame, face: &BoundingBox, out_size: usize) -> Vec<u8> {
    let fw = frame.width as f32;
    let fh = frame.height as f32;

    let x = face.x.max(0.0);
    let y = face.y.max(0.0);
    let w = face.width.max(1.0);
    let h = face.height.max(1.0);

    let side = w.max(h);
    let half = side / 2.0 + side * CROP_PAD_RATIO;
    let (cx, cy) = (x + w / 2.0, y + h / 2.0);

    let mut x1 = (cx - half).max(0.0);
    let mut y1 = (cy - half).max(0.0);
    let mut x2 = (cx + half).min(fw);
    let mut y2 = (cy + half).min(fh);

    if x2 <= x1 || y2 <= y1 {
        x1 = (x - CROP_FALLBACK_MARGIN).max(0.0);
        y1 = (y - CROP_FALLBACK_MARGIN).max(0.0);
        x2 = (x + w + CROP_FALLBACK_MARGIN).min(fw);
        y2 = (y + h + CROP_FALLBACK_MARGIN).min(fh);
    }

    let (x1, y1) = (x1.floor() as usize, y1.floor() as usize);
    let (x2, y2) = (x2.ceil() as usize, y2.ceil() as usize);
    if x2 <= x1 || y2 <= y1 {
        return vec![0u8; out_size * out_size * 3];
    }

    let crop_w = x2 - x1;
    let crop_h = y2 - y1;
    let stride = frame.width as usize * 3;
    let mut crop = Vec::with_capacity(crop_w * crop_h * 3);
    for row in y1..y2 {
        let start = row * stride + x1 * 3;
        crop.extend_from_slice(&frame.data[start..start + crop_w * 3]);
    }

    resample::resize_rgb(&crop, crop_w, crop_h, out_size, out_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(w: u32, h: u32, v: u8) -> Frame {
        Frame::from_rgb(vec![v; (w * h * 3) as usize], w, h).unwrap()
    }

    fn face(x: f32, y: f32, w: f32, h: f32, landmarks: Option<[(f32, f32); 5]>) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks,
        }
    }

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity_transform(&pts, &pts).unwrap();
        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        let src: [(f32, f32); 5] = [
            (76.5892, 103.3926),
            (147.0636, 103.0028),
            (112.0504, 143.4732),
            (83.0986, 184.7310),
            (141.4598, 184.4082),
        ];
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn test_coincident_landmarks_are_degenerate() {
        let src = [(10.0, 10.0); 5];
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert!(m.is_none());
    }

    #[test]
    fn test_both_paths_have_identical_dimensions() {
        let frame = gray_frame(640, 480, 128);
        let marked = face(250.0, 150.0, 120.0, 150.0, Some(REFERENCE_LANDMARKS_112));
        let with = align(&frame, &marked);
        let without = align(&frame, &face(250.0, 150.0, 120.0, 150.0, None));
        assert_eq!(with.method, AlignmentMethod::Landmarks);
        assert_eq!(without.method, AlignmentMethod::PaddedCrop);
        assert_eq!(with.size, without.size);
        assert_eq!(with.data.len(), ALIGNED_SIZE * ALIGNED_SIZE * 3);
        assert_eq!(without.data.len(), ALIGNED_SIZE * ALIGNED_SIZE * 3);
    }

    #[test]
    fn test_degenerate_landmarks_use_padded_crop() {
        let frame = gray_frame(200, 200, 50);
        let collapsed = face(50.0, 50.0, 80.0, 80.0, Some([(60.0, 60.0); 5]));
        let aligned = align(&frame, &collapsed);
        assert_eq!(aligned.method, AlignmentMethod::PaddedCrop);
        assert!(aligned.data.iter().all(|&p| p == 50));
    }

    #[test]
    fn test_padded_crop_at_frame_edge() {
        let frame = gray_frame(100, 100, 77);
        // Box hanging off the top-left corner still yields a full-size crop.
        let aligned = align(&frame, &face(-30.0, -30.0, 60.0, 60.0, None));
        assert_eq!(aligned.data.len(), ALIGNED_SIZE * ALIGNED_SIZE * 3);
        assert!(aligned.data.iter().all(|&p| p == 77));
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at the left eye lands near the reference left eye.
        let w = 200usize;
        let h = 200usize;
        let mut data = vec![0u8; w * h * 3];

        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        let lx = src_landmarks[0].0 as usize;
        let ly = src_landmarks[0].1 as usize;
        for py in ly - 2..=ly + 2 {
            for px in lx - 2..=lx + 2 {
                let i = (py * w + px) * 3;
                data[i..i + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let frame = Frame::from_rgb(data, w as u32, h as u32).unwrap();

        let aligned = align(&frame, &face(70.0, 40.0, 60.0, 80.0, Some(src_landmarks)));

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as usize;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as usize;
        let mut max_val = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                max_val = max_val.max(aligned.data[(y * ALIGNED_SIZE + x) * 3]);
            }
        }
        assert!(
            max_val > 100,
            "expected bright patch near ({ref_x}, {ref_y}), max={max_val}"
        );
    }
}
