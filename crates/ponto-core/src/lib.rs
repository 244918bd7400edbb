//! ponto-core: recognition event controller for face-based attendance.
//!
//! Turns per-frame face encodings into at most one attendance event per
//! person per cooldown period, with a work-hours window, a system-wide
//! lockout on repeated unknown faces, and retried delivery to the
//! attendance store. No camera, model or UI code lives here.

pub mod cache;
pub mod config;
pub mod controller;
pub mod cooldown;
pub mod evidence;
pub mod lockout;
pub mod matcher;
pub mod notify;
pub mod submitter;
pub mod types;
pub mod work_window;

pub use config::{ConfigError, ControllerConfig, Settings};
pub use controller::{ControllerStats, Decision, Outcome, RecognitionEventController};
pub use evidence::{EvidenceError, EvidenceSink};
pub use matcher::{EuclideanMatcher, Gallery, GalleryError, Matcher};
pub use notify::{NoopNotifier, Notification, NotificationPolicy, Notifier, NotifyError};
pub use submitter::{
    AttendanceStore, AttendanceSubmitter, StoreError, SubmissionResult, TimecardReceipt, TimecardRequest,
};
pub use types::{EntryType, Encoding, Identity, Observation, Probe, Timestamp};
