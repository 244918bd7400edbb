//! Recognition event controller.
//!
//! Runs every probe through one decision pipeline and returns exactly one
//! terminal [`Outcome`]:
//!
//! 1. resolve identity (cache, then nearest gallery reference);
//!    unknown faces feed the failure ledger → `Unresolved`
//! 2. note the system-wide lockout (display only, never blocks submission)
//! 3. outside work hours without after-hours permission → `OutOfHours`
//! 4. identity still cooling down → `Cooldown`
//! 5. submit; on acceptance record the cooldown and notify → `Accepted`,
//!    otherwise → `SubmitFailed` with no cooldown recorded
//!
//! Only the ledgers carry state between probes. All of them are internally
//! synchronized, so one controller can be shared across tasks.

use crate::cache::{CacheInsert, MatchCache};
use crate::config::ControllerConfig;
use crate::cooldown::CooldownLedger;
use crate::evidence::EvidenceSink;
use crate::lockout::{FailureLedger, UNKNOWN_SCOPE};
use crate::matcher::{nearest, select_candidate, Gallery, Matcher};
use crate::notify::{EventKind, NoopNotifier, Notification, NotificationPolicy, Notifier};
use crate::submitter::{AttendanceStore, AttendanceSubmitter, SubmissionResult};
use crate::types::{EntryType, Identity, Observation, Probe, Timestamp};
use crate::work_window::WorkWindowPolicy;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Terminal result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Unresolved,
    OutOfHours,
    Cooldown { remaining: Duration },
    /// Face recognized but the event was not recorded.
    SubmitFailed { reason: String },
    Accepted { entry_type: Option<EntryType> },
}

impl Outcome {
    /// Expected, non-error suppression.
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Outcome::OutOfHours | Outcome::Cooldown { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub observation: Observation,
    pub outcome: Outcome,
    /// System-wide lockout was active when this probe was decided.
    pub system_locked: bool,
}

impl Decision {
    /// User-visible status for this face.
    pub fn status_line(&self) -> String {
        let name = self
            .observation
            .identity
            .as_ref()
            .map(|i| i.name.as_str())
            .unwrap_or("Unknown");
        let mut line = match &self.outcome {
            Outcome::Unresolved => name.to_string(),
            Outcome::OutOfHours => format!("{name} (outside work hours)"),
            Outcome::Cooldown { remaining } => format!("{name} (wait {}s)", remaining.as_secs()),
            Outcome::SubmitFailed { .. } => format!("{name} (not recorded, try again)"),
            Outcome::Accepted { entry_type: Some(entry) } => format!("{name} ({entry})"),
            Outcome::Accepted { entry_type: None } => format!("{name} (recorded)"),
        };
        if self.system_locked {
            line.push_str(" [system locked]");
        }
        line
    }
}

/// Operator-facing snapshot of controller state.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStats {
    pub identities: usize,
    pub references: usize,
    pub cache_entries: usize,
    pub cache_capacity: usize,
    pub tracked_identities: usize,
    pub unknown_failures: usize,
    pub lockout_remaining_secs: Option<u64>,
}

pub struct RecognitionEventController<M, S, N = NoopNotifier> {
    config: ControllerConfig,
    matcher: M,
    gallery: RwLock<Arc<Gallery>>,
    cache: MatchCache,
    cooldowns: CooldownLedger,
    failures: FailureLedger,
    work_window: WorkWindowPolicy,
    submitter: AttendanceSubmitter<S>,
    notifier: Option<Arc<N>>,
    notifications: NotificationPolicy,
    evidence: Option<Arc<dyn EvidenceSink>>,
}

impl<M, S> RecognitionEventController<M, S, NoopNotifier>
where
    M: Matcher,
    S: AttendanceStore,
{
    pub fn new(config: ControllerConfig, matcher: M, gallery: Gallery, submitter: AttendanceSubmitter<S>) -> Self {
        let capacity = if config.cache_enabled { config.max_cache_size } else { 0 };
        Self {
            cache: MatchCache::new(capacity),
            cooldowns: CooldownLedger::new(config.cooldown()),
            failures: FailureLedger::new(config.max_failed_attempts, config.lockout(), config.failure_window()),
            work_window: config.work_window(),
            config,
            matcher,
            gallery: RwLock::new(Arc::new(gallery)),
            submitter,
            notifier: None,
            notifications: NotificationPolicy::default(),
            evidence: None,
        }
    }
}

impl<M, S, N> RecognitionEventController<M, S, N>
where
    M: Matcher,
    S: AttendanceStore,
    N: Notifier,
{
    /// Attach a notifier and the policy deciding which events it receives.
    pub fn with_notifier<N2: Notifier>(
        self,
        notifier: Arc<N2>,
        policy: NotificationPolicy,
    ) -> RecognitionEventController<M, S, N2> {
        RecognitionEventController {
            config: self.config,
            matcher: self.matcher,
            gallery: self.gallery,
            cache: self.cache,
            cooldowns: self.cooldowns,
            failures: self.failures,
            work_window: self.work_window,
            submitter: self.submitter,
            notifier: Some(notifier),
            notifications: policy,
            evidence: self.evidence,
        }
    }

    /// Frames of unresolved faces go here when `save_unknown_faces` is set.
    pub fn with_evidence_sink(mut self, sink: Arc<dyn EvidenceSink>) -> Self {
        self.evidence = Some(sink);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn gallery(&self) -> Arc<Gallery> {
        Arc::clone(&self.gallery.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a reloaded gallery. Cached resolutions are dropped with the old one.
    pub fn replace_gallery(&self, gallery: Gallery) {
        let identities = gallery.identity_count();
        let references = gallery.len();
        *self.gallery.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(gallery);
        self.cache.clear();
        tracing::info!(identities, references, "gallery replaced");
    }

    pub fn stats(&self, now: Timestamp) -> ControllerStats {
        let gallery = self.gallery();
        ControllerStats {
            identities: gallery.identity_count(),
            references: gallery.len(),
            cache_entries: self.cache.len(),
            cache_capacity: self.cache.capacity(),
            tracked_identities: self.cooldowns.len(),
            unknown_failures: self.failures.failure_count(UNKNOWN_SCOPE, now),
            lockout_remaining_secs: self
                .failures
                .lockout_remaining(UNKNOWN_SCOPE, now)
                .map(|d| d.as_secs()),
        }
    }

    /// Whether the system-wide unknown-face lockout is active at `now`.
    pub fn is_locked(&self, now: Timestamp) -> bool {
        self.failures.is_locked(UNKNOWN_SCOPE, now)
    }

    /// Decide every face of one processed frame, in order.
    pub async fn process_frame(&self, probes: Vec<Probe>) -> Vec<Decision> {
        let mut decisions = Vec::with_capacity(probes.len());
        for probe in probes {
            decisions.push(self.process(probe).await);
        }
        decisions
    }

    /// Run one probe through the full pipeline.
    pub async fn process(&self, probe: Probe) -> Decision {
        let now = probe.observed_at;
        let observation = self.resolve(&probe);

        let Some(identity) = observation.identity.clone() else {
            self.record_unresolved(probe, now);
            return Decision {
                observation,
                outcome: Outcome::Unresolved,
                system_locked: self.is_locked(now),
            };
        };

        let system_locked = self.is_locked(now);
        let decide = |outcome| Decision {
            observation: observation.clone(),
            outcome,
            system_locked,
        };

        if !self.config.allow_after_hours && !self.work_window.is_within_work_hours(now) {
            tracing::info!(employee_id = %identity.id, "registration attempt outside work hours");
            return decide(Outcome::OutOfHours);
        }

        let permit = match self.cooldowns.try_begin(&identity.id, now) {
            Ok(permit) => permit,
            Err(remaining) => {
                tracing::info!(
                    employee_id = %identity.id,
                    remaining_secs = remaining.as_secs(),
                    "identity cooling down"
                );
                return decide(Outcome::Cooldown { remaining });
            }
        };

        match self.submitter.submit(&identity, now).await {
            SubmissionResult::Accepted { entry_type, .. } => {
                permit.commit(now);
                self.notify_acceptance(&identity, entry_type, now);
                decide(Outcome::Accepted { entry_type })
            }
            SubmissionResult::Failed { reason, attempts } => {
                drop(permit);
                tracing::error!(
                    employee_id = %identity.id,
                    employee_name = %identity.name,
                    attempts,
                    reason = %reason,
                    "face recognized but attendance event was not recorded"
                );
                decide(Outcome::SubmitFailed {
                    reason: reason.to_string(),
                })
            }
        }
    }

    /// Cache first, then nearest gallery reference.
    fn resolve(&self, probe: &Probe) -> Observation {
        let fingerprint = probe.encoding.fingerprint();
        let unresolved = |distance| Observation {
            identity: None,
            distance,
            fingerprint,
            observed_at: probe.observed_at,
        };

        let gallery = self.gallery();
        if gallery.is_empty() {
            return unresolved(None);
        }

        if let Some(identity) = self.cache.lookup(&fingerprint) {
            return Observation {
                identity: Some(identity),
                distance: None,
                fingerprint,
                observed_at: probe.observed_at,
            };
        }

        let tolerance = self.config.tolerance;
        let matches = self.matcher.compare_faces(&gallery, &probe.encoding, tolerance);
        let distances = self.matcher.face_distance(&gallery, &probe.encoding);
        if distances.is_empty() {
            tracing::warn!(
                probe_dim = probe.encoding.len(),
                gallery_dim = gallery.dimension(),
                "probe could not be compared against the gallery"
            );
            return unresolved(None);
        }

        let Some((row, distance)) = select_candidate(&matches, &distances, tolerance) else {
            let best = nearest(&distances).map(|(_, d)| d);
            tracing::debug!(best_distance = ?best, tolerance, "no gallery match");
            return unresolved(best);
        };
        let Some(identity) = gallery.identity(row).cloned() else {
            return unresolved(Some(distance));
        };

        if self.cache.insert(fingerprint, identity.clone()) == CacheInsert::Rejected {
            tracing::trace!(capacity = self.cache.capacity(), "match cache full; not caching");
        }
        tracing::debug!(employee_id = %identity.id, distance, "face resolved");

        Observation {
            identity: Some(identity),
            distance: Some(distance),
            fingerprint,
            observed_at: probe.observed_at,
        }
    }

    fn record_unresolved(&self, probe: Probe, now: Timestamp) {
        let record = self.failures.record_failure(UNKNOWN_SCOPE, now);
        tracing::debug!(attempts = record.attempts, "unresolved face");

        if self.config.save_unknown_faces {
            if let (Some(sink), Some(frame)) = (&self.evidence, probe.frame) {
                let sink = Arc::clone(sink);
                tokio::task::spawn_blocking(move || match sink.save(&frame, now) {
                    Ok(path) => tracing::debug!(path = %path.display(), "unknown face saved"),
                    Err(err) => tracing::error!(error = %err, "failed to save unknown face"),
                });
            }
        }

        if self.notifications.on_unknown_face {
            self.dispatch(Notification::unknown_face(record.attempts, now));
        }
    }

    fn notify_acceptance(&self, identity: &Identity, entry_type: Option<EntryType>, at: Timestamp) {
        for event in self.notifications.events_for(entry_type, at) {
            self.dispatch(Notification::attendance(event, identity, at));
        }
    }

    /// Fire and forget; delivery failures are only logged.
    fn dispatch(&self, notification: Notification) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let notifier = Arc::clone(notifier);
        tokio::spawn(async move {
            let event: EventKind = notification.event;
            match notifier.notify(&notification).await {
                Ok(()) => tracing::debug!(?event, "notification sent"),
                Err(err) => tracing::error!(?event, error = %err, "notification failed"),
            }
        });
    }
}
