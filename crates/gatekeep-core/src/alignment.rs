//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face so its five landmarks land as close as possible
//! (least squares) to the canonical ArcFace positions in a 112×112 crop.

use crate::frame::Frame;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// `(x, y) -> (a·x − b·y + tx, b·x + a·y + ty)`: uniform scale, rotation, translation.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Least-squares fit mapping `src` onto `dst`.
    ///
    /// Closed form: centre both point sets, the rotation-scale pair is the
    /// normalized dot/cross correlation, and the translation carries the
    /// source centroid onto the destination centroid. Degenerate input
    /// (all source points coincident) yields the identity.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (scx, scy) = centroid(src);
        let (dcx, dcy) = centroid(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy) = (sx - scx, sy - scy);
            let (dx, dy) = (dx - dcx, dy - dcy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }

        if norm < 1e-12 {
            return Self::IDENTITY;
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: dcx - (a * scx - b * scy),
            ty: dcy - (b * scx + a * scy),
        }
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// The inverse transform, or `None` when the scale collapses to zero.
    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Sample a square RGB crop whose pixel `(x, y)` comes from `frame` at
/// `to_source((x, y))`, bilinearly interpolated. Off-frame samples are black.
fn warp(frame: &Frame, to_source: &Similarity, out_size: usize) -> Vec<u8> {
    let width = frame.width() as i32;
    let height = frame.height() as i32;
    let texel = |x: i32, y: i32| -> [f32; 3] {
        if (0..width).contains(&x) && (0..height).contains(&y) {
            frame.pixel(x as usize, y as usize).map(f32::from)
        } else {
            [0.0; 3]
        }
    };

    let mut output = Vec::with_capacity(out_size * out_size * 3);
    for oy in 0..out_size {
        for ox in 0..out_size {
            let (sx, sy) = to_source.apply((ox as f32, oy as f32));
            let (x0, y0) = (sx.floor() as i32, sy.floor() as i32);
            let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);

            let weights = [
                ((x0, y0), (1.0 - fx) * (1.0 - fy)),
                ((x0 + 1, y0), fx * (1.0 - fy)),
                ((x0, y0 + 1), (1.0 - fx) * fy),
                ((x0 + 1, y0 + 1), fx * fy),
            ];
            let mut rgb = [0.0f32; 3];
            for ((x, y), w) in weights {
                for (acc, v) in rgb.iter_mut().zip(texel(x, y)) {
                    *acc += v * w;
                }
            }
            output.extend(rgb.map(|v| v.round().clamp(0.0, 255.0) as u8));
        }
    }

    output
}

/// Align a detected face to a canonical 112×112 RGB crop.
///
/// A degenerate landmark set produces an all-black crop.
pub fn align_face(frame: &Frame, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let to_reference = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112);
    match to_reference.inverse() {
        Some(to_source) => warp(frame, &to_source, ALIGNED_SIZE),
        None => vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE * 3],
    }
}
