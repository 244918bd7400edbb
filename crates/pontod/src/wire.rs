//! Newline-delimited JSON in and out of the daemon.
//!
//! Input, one frame per line:
//! `{"observed_at": "<RFC 3339>"?, "faces": [{"encoding": [..], "frame": {width, height, rgb}?}]}`
//!
//! Output, one line per decided frame, listing each face's outcome.

use chrono::{DateTime, FixedOffset, Local, SecondsFormat};
use ponto_core::controller::{Decision, Outcome};
use ponto_core::types::{EntryType, Encoding, FrameSnapshot, Probe, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct FrameInput {
    #[serde(default)]
    pub observed_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub faces: Vec<FaceInput>,
}

#[derive(Debug, Deserialize)]
pub struct FaceInput {
    pub encoding: Encoding,
    #[serde(default)]
    pub frame: Option<FrameSnapshot>,
}

impl FrameInput {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// The frame's capture time, or `now` when the producer left it out.
    pub fn observed_at(&self, now: Timestamp) -> Timestamp {
        self.observed_at.map(|t| t.with_timezone(&Local)).unwrap_or(now)
    }

    /// Probes for every face, stamped with `observed_at` or `now`.
    pub fn into_probes(self, now: Timestamp) -> Vec<Probe> {
        let observed_at = self.observed_at(now);
        self.faces
            .into_iter()
            .map(|face| {
                let probe = Probe::new(face.encoding, observed_at);
                match face.frame {
                    Some(frame) => probe.with_frame(frame),
                    None => probe,
                }
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct FrameOutput {
    pub observed_at: String,
    pub faces: Vec<FaceOutput>,
}

#[derive(Debug, Serialize)]
pub struct FaceOutput {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<EntryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub system_locked: bool,
    pub status: String,
}

impl FrameOutput {
    pub fn new(observed_at: Timestamp, decisions: &[Decision]) -> Self {
        Self {
            observed_at: observed_at.to_rfc3339_opts(SecondsFormat::Millis, false),
            faces: decisions.iter().map(FaceOutput::from).collect(),
        }
    }
}

impl From<&Decision> for FaceOutput {
    fn from(decision: &Decision) -> Self {
        let identity = decision.observation.identity.as_ref();
        let mut face = FaceOutput {
            outcome: "",
            employee_id: identity.map(|i| i.id.clone()),
            employee_name: identity.map(|i| i.name.clone()),
            distance: decision.observation.distance,
            remaining_secs: None,
            entry_type: None,
            reason: None,
            system_locked: decision.system_locked,
            status: decision.status_line(),
        };
        face.outcome = match &decision.outcome {
            Outcome::Unresolved => "unresolved",
            Outcome::OutOfHours => "out_of_hours",
            Outcome::Cooldown { remaining } => {
                face.remaining_secs = Some(remaining.as_secs());
                "cooldown"
            }
            Outcome::SubmitFailed { reason } => {
                face.reason = Some(reason.clone());
                "submit_failed"
            }
            Outcome::Accepted { entry_type } => {
                face.entry_type = *entry_type;
                "accepted"
            }
        };
        face
    }
}
