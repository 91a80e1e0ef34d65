//! Representations for the pose data we stream: landmark vectors as produced by the estimator and
//! the per-frame envelope the dispatcher consumes

pub mod frame;
pub mod source;

use ndarray::{Array2, ArrayView1};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A single tracked point in space
pub type Point3D = (f32, f32, f32);

/// Coordinates per landmark (x, y, z)
pub const COORDS_PER_LANDMARK: usize = 3;

/// Landmark count of a full-body pose model
pub const BODY_LANDMARKS: usize = 33;

/// One frame's worth of tracked 3D points, stored row-major as an `N x 3` matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkVector(Array2<f32>);

impl LandmarkVector {
    /// Builds a vector from a list of points
    pub fn from_points(points: &[Point3D]) -> Self {
        let mut landmarks = Array2::zeros((points.len(), COORDS_PER_LANDMARK));
        for (mut row, &(x, y, z)) in landmarks.rows_mut().into_iter().zip(points) {
            row[0] = x;
            row[1] = y;
            row[2] = z;
        }
        Self(landmarks)
    }

    /// Builds a vector from flattened `x, y, z` triples. Returns `None` when the length is not a
    /// multiple of three
    pub fn from_flat(values: Vec<f32>) -> Option<Self> {
        if values.len() % COORDS_PER_LANDMARK != 0 {
            return None;
        }
        let rows = values.len() / COORDS_PER_LANDMARK;
        Array2::from_shape_vec((rows, COORDS_PER_LANDMARK), values)
            .ok()
            .map(Self)
    }

    /// Creates a vector of `len` random points in the normalized image cube, with depth centered
    /// on zero
    pub fn fuzz(len: usize) -> Self {
        let mut rng = thread_rng();
        let points: Vec<Point3D> = (0..len)
            .map(|_| {
                (
                    rng.gen_range(0f32..1f32),
                    rng.gen_range(0f32..1f32),
                    rng.gen_range(-0.5f32..0.5f32),
                )
            })
            .collect();

        Self::from_points(&points)
    }

    /// Number of landmarks
    pub fn len(&self) -> usize {
        self.0.nrows()
    }

    /// Whether the vector holds no landmarks
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A single landmark's coordinates
    pub fn point(&self, index: usize) -> Option<Point3D> {
        (index < self.len()).then(|| {
            let row: ArrayView1<'_, f32> = self.0.row(index);
            (row[0], row[1], row[2])
        })
    }

    /// Every coordinate in `x, y, z` order, landmark by landmark
    pub fn flat_iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.0.iter().copied()
    }

    /// The underlying `N x 3` matrix
    pub fn as_array(&self) -> &Array2<f32> {
        &self.0
    }
}

/// One estimator output: when the frame arrived and what, if anything, was detected
#[derive(Debug, Clone)]
pub struct PoseFrame {
    /// Arrival time of the frame, used for rate limiting
    pub timestamp: Instant,
    /// The detected pose, `None` when the estimator found nobody in the frame
    pub landmarks: Option<LandmarkVector>,
}

impl PoseFrame {
    /// A frame with a detection
    pub fn detected(timestamp: Instant, landmarks: LandmarkVector) -> Self {
        Self {
            timestamp,
            landmarks: Some(landmarks),
        }
    }

    /// A frame in which nothing was detected
    pub fn empty(timestamp: Instant) -> Self {
        Self {
            timestamp,
            landmarks: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LandmarkVector, BODY_LANDMARKS};

    #[test]
    fn from_points_is_row_major() {
        let vector = LandmarkVector::from_points(&[(1.0, 2.0, 3.0), (4.0, 5.0, 6.0)]);

        assert_eq!(vector.len(), 2);
        assert_eq!(vector.point(1), Some((4.0, 5.0, 6.0)));
        assert_eq!(vector.point(2), None);
        assert_eq!(
            vector.flat_iter().collect::<Vec<_>>(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
    }

    #[test]
    fn from_flat_rejects_partial_landmarks() {
        assert!(LandmarkVector::from_flat(vec![1.0, 2.0]).is_none());
        assert!(LandmarkVector::from_flat(vec![]).is_some_and(|v| v.is_empty()));
    }

    #[test]
    fn fuzz_stays_in_range() {
        let vector = LandmarkVector::fuzz(BODY_LANDMARKS);
        assert_eq!(vector.len(), BODY_LANDMARKS);

        for i in 0..vector.len() {
            let (x, y, z) = vector.point(i).unwrap();
            assert!((0.0..1.0).contains(&x));
            assert!((0.0..1.0).contains(&y));
            assert!((-0.5..0.5).contains(&z));
        }
    }
}
