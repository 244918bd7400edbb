use chrono::{DateTime, Local, TimeDelta};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Wall-clock timestamp used throughout the decision pipeline.
pub type Timestamp = DateTime<Local>;

/// Time elapsed from `earlier` to `now`. Clock skew (earlier in the future) counts as zero.
pub(crate) fn elapsed_between(earlier: Timestamp, now: Timestamp) -> Duration {
    (now - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// `at + span`, saturating at `at` if the sum does not fit the calendar.
pub(crate) fn offset_by(at: Timestamp, span: Duration) -> Timestamp {
    let delta = TimeDelta::from_std(span).unwrap_or(TimeDelta::MAX);
    at.checked_add_signed(delta).unwrap_or(at)
}

/// Employee identity: stable key plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Face encoding vector produced by the external encoder (typically 128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Content hash used as the match-cache key.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.values)
    }

    /// Euclidean distance between two encodings.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Element-wise mean of several captures of the same face.
    ///
    /// Returns `None` for an empty slice or when dimensions disagree.
    pub fn mean(encodings: &[Encoding]) -> Option<Encoding> {
        let first = encodings.first()?;
        let dim = first.len();
        if dim == 0 || encodings.iter().any(|e| e.len() != dim) {
            return None;
        }

        let mut sum = vec![0.0f32; dim];
        for encoding in encodings {
            for (acc, v) in sum.iter_mut().zip(&encoding.values) {
                *acc += v;
            }
        }
        let n = encodings.len() as f32;
        Some(Encoding::new(sum.into_iter().map(|v| v / n).collect()))
    }
}

/// SHA-256 over the little-endian bytes of an encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(values: &[f32]) -> Self {
        let mut hasher = Sha256::new();
        for v in values {
            // -0.0 == 0.0 numerically; hash them the same.
            let v = if *v == 0.0 { 0.0f32 } else { *v };
            hasher.update(v.to_le_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(")?;
        for b in &self.0[..6] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "…)")
    }
}

/// Raw RGB8 frame kept only as evidence for unresolved faces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// One detected face in one processed frame, as handed to the controller.
#[derive(Debug, Clone)]
pub struct Probe {
    pub encoding: Encoding,
    pub observed_at: Timestamp,
    pub frame: Option<FrameSnapshot>,
}

impl Probe {
    pub fn new(encoding: Encoding, observed_at: Timestamp) -> Self {
        Self {
            encoding,
            observed_at,
            frame: None,
        }
    }

    pub fn with_frame(mut self, frame: FrameSnapshot) -> Self {
        self.frame = Some(frame);
        self
    }
}

/// Result of identity resolution for a single probe. Never persisted.
#[derive(Debug, Clone)]
pub struct Observation {
    /// `None` means the face is unknown.
    pub identity: Option<Identity>,
    /// Distance to the nearest gallery reference; `None` on a cache hit
    /// or when the gallery could not be consulted.
    pub distance: Option<f32>,
    pub fingerprint: Fingerprint,
    pub observed_at: Timestamp,
}

impl Observation {
    pub fn is_resolved(&self) -> bool {
        self.identity.is_some()
    }
}

/// In/out classification echoed by the attendance store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Entrada,
    Saida,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryType::Entrada => f.write_str("entrada"),
            EntryType::Saida => f.write_str("saida"),
        }
    }
}
