//! Gallery of known faces and the matcher boundary.
//!
//! The matcher itself is treated as a black box returning per-reference
//! match flags and distances; [`EuclideanMatcher`] is the default
//! implementation used by the daemon.

use crate::types::{Encoding, Identity};
use ndarray::{Array2, ArrayView1, Axis};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("empty encoding for identity {0}")]
    EmptyEncoding(String),
    #[error("encoding for identity {identity} has {got} dimensions, gallery uses {expected}")]
    DimensionMismatch {
        identity: String,
        expected: usize,
        got: usize,
    },
    #[error("gallery shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Reference encodings of known identities, one row per reference.
///
/// An identity may own several rows.
#[derive(Debug, Clone)]
pub struct Gallery {
    identities: Vec<Identity>,
    encodings: Array2<f32>,
}

impl Gallery {
    pub fn empty() -> Self {
        Self {
            identities: Vec::new(),
            encodings: Array2::zeros((0, 0)),
        }
    }

    /// Build a gallery from (identity, reference encoding) pairs.
    ///
    /// All encodings must share one dimension.
    pub fn from_entries<I>(entries: I) -> Result<Self, GalleryError>
    where
        I: IntoIterator<Item = (Identity, Encoding)>,
    {
        let mut identities = Vec::new();
        let mut flat = Vec::new();
        let mut dim = None;

        for (identity, encoding) in entries {
            if encoding.is_empty() {
                return Err(GalleryError::EmptyEncoding(identity.id));
            }
            let expected = *dim.get_or_insert(encoding.len());
            if encoding.len() != expected {
                return Err(GalleryError::DimensionMismatch {
                    identity: identity.id,
                    expected,
                    got: encoding.len(),
                });
            }
            flat.extend_from_slice(&encoding.values);
            identities.push(identity);
        }

        let Some(dim) = dim else {
            return Ok(Self::empty());
        };
        let encodings = Array2::from_shape_vec((identities.len(), dim), flat)?;
        Ok(Self {
            identities,
            encodings,
        })
    }

    /// Number of reference rows.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Number of distinct identities.
    pub fn identity_count(&self) -> usize {
        self.identities
            .iter()
            .map(|i| i.id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn dimension(&self) -> usize {
        self.encodings.ncols()
    }

    pub fn identity(&self, row: usize) -> Option<&Identity> {
        self.identities.get(row)
    }

    pub fn encodings(&self) -> &Array2<f32> {
        &self.encodings
    }
}

/// Strategy for comparing a probe encoding against the gallery.
///
/// Both methods return one value per gallery row, or an empty vector when
/// the probe cannot be compared (empty gallery, dimension mismatch).
pub trait Matcher: Send + Sync {
    fn face_distance(&self, gallery: &Gallery, probe: &Encoding) -> Vec<f32>;

    fn compare_faces(&self, gallery: &Gallery, probe: &Encoding, tolerance: f32) -> Vec<bool> {
        self.face_distance(gallery, probe)
            .into_iter()
            .map(|d| d <= tolerance)
            .collect()
    }
}

/// Euclidean distance matcher over the whole gallery matrix.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn face_distance(&self, gallery: &Gallery, probe: &Encoding) -> Vec<f32> {
        if gallery.is_empty() || probe.len() != gallery.dimension() {
            return Vec::new();
        }
        let probe = ArrayView1::from(probe.values.as_slice());
        let diff = gallery.encodings() - &probe;
        diff.mapv(|x| x * x)
            .sum_axis(Axis(1))
            .mapv(f32::sqrt)
            .to_vec()
    }
}

/// Nearest gallery row: `(row, distance)` with the minimum distance.
///
/// Ties resolve to the first row.
pub fn nearest(distances: &[f32]) -> Option<(usize, f32)> {
    distances
        .iter()
        .copied()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Accept the nearest candidate only if the matcher flagged it AND its
/// distance is strictly below `tolerance`.
pub fn select_candidate(matches: &[bool], distances: &[f32], tolerance: f32) -> Option<(usize, f32)> {
    let (row, distance) = nearest(distances)?;
    let flagged = matches.get(row).copied().unwrap_or(false);
    (flagged && distance < tolerance).then_some((row, distance))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery() -> Gallery {
        Gallery::from_entries([
            (Identity::new("E1", "Ana"), Encoding::new(vec![0.0, 0.0, 0.0])),
            (Identity::new("E2", "Bruno"), Encoding::new(vec![1.0, 0.0, 0.0])),
            (Identity::new("E1", "Ana"), Encoding::new(vec![0.0, 0.1, 0.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_gallery_counts() {
        let g = gallery();
        assert_eq!(g.len(), 3);
        assert_eq!(g.identity_count(), 2);
        assert_eq!(g.dimension(), 3);
    }

    #[test]
    fn test_gallery_rejects_mixed_dimensions() {
        let err = Gallery::from_entries([
            (Identity::new("E1", "Ana"), Encoding::new(vec![0.0, 0.0])),
            (Identity::new("E2", "Bruno"), Encoding::new(vec![0.0])),
        ])
        .unwrap_err();
        assert!(matches!(err, GalleryError::DimensionMismatch { expected: 2, got: 1, .. }));
    }

    #[test]
    fn test_euclidean_distances_per_row() {
        let d = EuclideanMatcher.face_distance(&gallery(), &Encoding::new(vec![1.0, 0.0, 0.0]));
        assert_eq!(d.len(), 3);
        assert!((d[0] - 1.0).abs() < 1e-6);
        assert!(d[1].abs() < 1e-6);
    }

    #[test]
    fn test_distance_dimension_mismatch_is_empty() {
        let d = EuclideanMatcher.face_distance(&gallery(), &Encoding::new(vec![1.0]));
        assert!(d.is_empty());
        assert!(EuclideanMatcher.face_distance(&Gallery::empty(), &Encoding::new(vec![1.0])).is_empty());
    }

    #[test]
    fn test_compare_faces_uses_inclusive_tolerance() {
        let m = EuclideanMatcher.compare_faces(&gallery(), &Encoding::new(vec![0.5, 0.0, 0.0]), 0.5);
        assert_eq!(m, vec![true, true, false]);
    }

    #[test]
    fn test_select_candidate_requires_both_conditions() {
        // Nearest is row 1, flagged, strictly under tolerance.
        assert_eq!(select_candidate(&[false, true], &[0.7, 0.3], 0.6), Some((1, 0.3)));
        // Matcher disagrees with the distance function.
        assert_eq!(select_candidate(&[true, false], &[0.7, 0.3], 0.6), None);
        // Distance equal to tolerance is not a match.
        assert_eq!(select_candidate(&[true], &[0.6], 0.6), None);
        assert_eq!(select_candidate(&[], &[], 0.6), None);
    }

    #[test]
    fn test_nearest_prefers_first_on_tie() {
        assert_eq!(nearest(&[0.4, 0.2, 0.2]), Some((1, 0.2)));
    }
}
