//! Upgrade phases
//!
//! An upgrade walks a fixed sequence of phases. The phase is stored
//! explicitly; timestamps are kept beside it as an audit trail.
//!
//! ```text
//! Stable -> Started -> Unregistered -> AgreementsCleared
//!        -> ExecutionStarted -> Reregistered
//!
//! any of Started..=ExecutionStarted -> Failed
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a definition is in its upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    /// Not upgrading
    #[default]
    Stable,
    /// Upgrade chosen, nothing done yet
    Started,
    /// Old service unregistered from the exchange
    Unregistered,
    /// Agreements on the old service are gone
    AgreementsCleared,
    /// Containers for the new definition are starting
    ExecutionStarted,
    /// New service registered on the exchange; terminal success
    Reregistered,
    /// Terminal failure; only cleared by archiving and restarting
    Failed,
}

impl UpgradePhase {
    /// Phases reachable from `self`
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [UpgradePhase] {
        use UpgradePhase::{
            AgreementsCleared, ExecutionStarted, Failed, Reregistered, Stable, Started,
            Unregistered,
        };
        match self {
            Stable => &[Started],
            Started => &[Unregistered, Failed],
            Unregistered => &[AgreementsCleared, Failed],
            AgreementsCleared => &[ExecutionStarted, Failed],
            ExecutionStarted => &[Reregistered, Failed],
            Reregistered | Failed => &[],
        }
    }

    /// Started but neither finished nor failed
    #[inline]
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::Started | Self::Unregistered | Self::AgreementsCleared | Self::ExecutionStarted
        )
    }

    /// No further transitions
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Reregistered | Self::Failed)
    }
}

impl fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stable => "stable",
            Self::Started => "started",
            Self::Unregistered => "unregistered",
            Self::AgreementsCleared => "agreements_cleared",
            Self::ExecutionStarted => "execution_started",
            Self::Reregistered => "reregistered",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why an upgrade (or instance) was terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    UnregisterExchangeFailed,
    ClearOldAgreementsFailed,
    ExecutionFailed,
    ReregisterExchangeFailed,
    ImageLoadFailed,
    DeletedByUpgradeProcess,
    DeletedForAgreementEnded,
}

impl FailureReason {
    /// Every known reason
    pub const ALL: [FailureReason; 7] = [
        Self::UnregisterExchangeFailed,
        Self::ClearOldAgreementsFailed,
        Self::ExecutionFailed,
        Self::ReregisterExchangeFailed,
        Self::ImageLoadFailed,
        Self::DeletedByUpgradeProcess,
        Self::DeletedForAgreementEnded,
    ];

    /// Numeric code reported to the exchange
    #[must_use]
    pub const fn code(self) -> u64 {
        match self {
            Self::UnregisterExchangeFailed => 200,
            Self::ClearOldAgreementsFailed => 201,
            Self::ExecutionFailed => 202,
            Self::ReregisterExchangeFailed => 203,
            Self::ImageLoadFailed => 204,
            Self::DeletedByUpgradeProcess => 205,
            Self::DeletedForAgreementEnded => 206,
        }
    }

    /// Reason for a numeric code
    #[must_use]
    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    /// Human readable description
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnregisterExchangeFailed => "Unregistering microservice on exchange failed",
            Self::ClearOldAgreementsFailed => "Clearing old agreements failed",
            Self::ExecutionFailed => "Execution failed",
            Self::ReregisterExchangeFailed => "Reregistering microservice on exchange failed",
            Self::ImageLoadFailed => "Image loading failed",
            Self::DeletedByUpgradeProcess => "Deleted by upgrading process",
            Self::DeletedForAgreementEnded => "Deleted for agreement ended",
        }
    }
}

/// Describe a reason code, tolerating codes from newer agents
#[must_use]
pub fn decode_reason_code(code: u64) -> &'static str {
    FailureReason::from_code(code)
        .map_or("unknown reason code, device might be downlevel", FailureReason::description)
}

/// Audit timestamps (unix seconds); `None` means the phase was not reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeTimestamps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unregistered: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreements_cleared: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_started: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reregistered: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
}

impl UpgradeTimestamps {
    /// Latest timestamp recorded so far
    #[must_use]
    pub fn latest(&self) -> Option<u64> {
        [
            self.started,
            self.unregistered,
            self.agreements_cleared,
            self.execution_started,
            self.reregistered,
            self.failed,
        ]
        .into_iter()
        .flatten()
        .max()
    }
}

/// Failure details recorded with [`UpgradePhase::Failed`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeFailure {
    pub reason: FailureReason,
    pub description: String,
}

/// Events that drive the phase machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeEvent {
    Start,
    Unregistered,
    AgreementsCleared,
    ExecutionStarted,
    Reregistered,
    Fail(FailureReason),
}

impl UpgradeEvent {
    /// Phase this event moves to
    #[must_use]
    pub const fn target(self) -> UpgradePhase {
        match self {
            Self::Start => UpgradePhase::Started,
            Self::Unregistered => UpgradePhase::Unregistered,
            Self::AgreementsCleared => UpgradePhase::AgreementsCleared,
            Self::ExecutionStarted => UpgradePhase::ExecutionStarted,
            Self::Reregistered => UpgradePhase::Reregistered,
            Self::Fail(_) => UpgradePhase::Failed,
        }
    }
}

/// Illegal phase change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal upgrade transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: UpgradePhase,
    pub to: UpgradePhase,
}

/// Phase plus audit trail for one definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeProgress {
    phase: UpgradePhase,
    #[serde(default)]
    timestamps: UpgradeTimestamps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<UpgradeFailure>,
}

impl UpgradeProgress {
    /// Fresh, not upgrading
    #[inline]
    #[must_use]
    pub fn stable() -> Self {
        Self::default()
    }

    /// Interpret a bare set of timestamps, as written by older agents.
    ///
    /// A failure timestamp wins; otherwise the furthest phase reached is
    /// taken. Without a start timestamp the record is stable whatever else
    /// is set.
    #[must_use]
    pub fn from_timestamps(timestamps: UpgradeTimestamps, failure: Option<UpgradeFailure>) -> Self {
        let phase = if timestamps.started.is_none() {
            UpgradePhase::Stable
        } else if timestamps.failed.is_some() {
            UpgradePhase::Failed
        } else if timestamps.reregistered.is_some() {
            UpgradePhase::Reregistered
        } else if timestamps.execution_started.is_some() {
            UpgradePhase::ExecutionStarted
        } else if timestamps.agreements_cleared.is_some() {
            UpgradePhase::AgreementsCleared
        } else if timestamps.unregistered.is_some() {
            UpgradePhase::Unregistered
        } else {
            UpgradePhase::Started
        };
        let failure = if phase == UpgradePhase::Failed { failure } else { None };
        Self {
            phase,
            timestamps,
            failure,
        }
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> UpgradePhase {
        self.phase
    }

    /// Audit timestamps
    #[inline]
    #[must_use]
    pub fn timestamps(&self) -> &UpgradeTimestamps {
        &self.timestamps
    }

    /// Failure details, set only in [`UpgradePhase::Failed`]
    #[inline]
    #[must_use]
    pub fn failure(&self) -> Option<&UpgradeFailure> {
        self.failure.as_ref()
    }

    /// When the upgrade started
    #[inline]
    #[must_use]
    pub fn started_at(&self) -> Option<u64> {
        self.timestamps.started
    }

    /// When containers started coming up
    #[inline]
    #[must_use]
    pub fn execution_started_at(&self) -> Option<u64> {
        self.timestamps.execution_started
    }

    /// Apply an event at time `now`.
    ///
    /// The stamped time never goes below an earlier stamp, so the audit trail
    /// stays monotonic even if the wall clock steps back.
    ///
    /// # Errors
    /// Returns [`TransitionError`] if the event is not allowed from the
    /// current phase; the progress is left untouched.
    pub fn apply(&mut self, event: UpgradeEvent, now: u64) -> Result<UpgradePhase, TransitionError> {
        let to = event.target();
        if !self.phase.allowed_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }

        let at = self.timestamps.latest().map_or(now, |last| now.max(last));
        let slot = match event {
            UpgradeEvent::Start => &mut self.timestamps.started,
            UpgradeEvent::Unregistered => &mut self.timestamps.unregistered,
            UpgradeEvent::AgreementsCleared => &mut self.timestamps.agreements_cleared,
            UpgradeEvent::ExecutionStarted => &mut self.timestamps.execution_started,
            UpgradeEvent::Reregistered => &mut self.timestamps.reregistered,
            UpgradeEvent::Fail(reason) => {
                self.failure = Some(UpgradeFailure {
                    reason,
                    description: reason.description().to_string(),
                });
                &mut self.timestamps.failed
            }
        };
        *slot = Some(at);
        self.phase = to;
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_stamps_every_phase() {
        let mut p = UpgradeProgress::stable();
        p.apply(UpgradeEvent::Start, 100).unwrap();
        p.apply(UpgradeEvent::Unregistered, 110).unwrap();
        p.apply(UpgradeEvent::AgreementsCleared, 120).unwrap();
        p.apply(UpgradeEvent::ExecutionStarted, 130).unwrap();
        p.apply(UpgradeEvent::Reregistered, 140).unwrap();

        assert_eq!(p.phase(), UpgradePhase::Reregistered);
        assert_eq!(p.started_at(), Some(100));
        assert_eq!(p.timestamps().reregistered, Some(140));
        assert!(p.failure().is_none());
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        let mut p = UpgradeProgress::stable();
        p.apply(UpgradeEvent::Start, 100).unwrap();
        let err = p.apply(UpgradeEvent::ExecutionStarted, 101).unwrap_err();
        assert_eq!(err.from, UpgradePhase::Started);
        assert_eq!(err.to, UpgradePhase::ExecutionStarted);
        assert_eq!(p.phase(), UpgradePhase::Started);
        assert_eq!(p.execution_started_at(), None);
    }

    #[test]
    fn failure_is_terminal() {
        let mut p = UpgradeProgress::stable();
        p.apply(UpgradeEvent::Start, 1).unwrap();
        p.apply(UpgradeEvent::Fail(FailureReason::ImageLoadFailed), 2).unwrap();
        assert_eq!(p.failure().unwrap().reason, FailureReason::ImageLoadFailed);
        assert!(p.apply(UpgradeEvent::Unregistered, 3).is_err());
        assert!(p.apply(UpgradeEvent::Start, 3).is_err());
    }

    #[test]
    fn cannot_fail_before_starting() {
        let mut p = UpgradeProgress::stable();
        assert!(p.apply(UpgradeEvent::Fail(FailureReason::ExecutionFailed), 1).is_err());
    }

    #[test]
    fn timestamps_stay_monotonic_when_clock_steps_back() {
        let mut p = UpgradeProgress::stable();
        p.apply(UpgradeEvent::Start, 500).unwrap();
        p.apply(UpgradeEvent::Unregistered, 400).unwrap();
        assert_eq!(p.timestamps().unregistered, Some(500));
    }

    #[test]
    fn legacy_timestamps_interpretation() {
        let ts = UpgradeTimestamps {
            started: Some(10),
            unregistered: Some(11),
            ..Default::default()
        };
        assert_eq!(
            UpgradeProgress::from_timestamps(ts, None).phase(),
            UpgradePhase::Unregistered
        );

        let orphan = UpgradeTimestamps {
            execution_started: Some(5),
            ..Default::default()
        };
        assert_eq!(
            UpgradeProgress::from_timestamps(orphan, None).phase(),
            UpgradePhase::Stable
        );

        let failed = UpgradeTimestamps {
            started: Some(1),
            reregistered: Some(3),
            failed: Some(2),
            ..Default::default()
        };
        assert_eq!(
            UpgradeProgress::from_timestamps(failed, None).phase(),
            UpgradePhase::Failed
        );
    }

    #[test]
    fn reason_codes() {
        assert_eq!(decode_reason_code(202), "Execution failed");
        assert_eq!(
            decode_reason_code(999),
            "unknown reason code, device might be downlevel"
        );
        for reason in FailureReason::ALL {
            assert_eq!(FailureReason::from_code(reason.code()), Some(reason));
        }
    }

    #[test]
    fn in_flight_and_terminal_are_disjoint() {
        for phase in [
            UpgradePhase::Stable,
            UpgradePhase::Started,
            UpgradePhase::Unregistered,
            UpgradePhase::AgreementsCleared,
            UpgradePhase::ExecutionStarted,
            UpgradePhase::Reregistered,
            UpgradePhase::Failed,
        ] {
            assert!(!(phase.is_in_flight() && phase.is_terminal()));
            assert_eq!(phase.is_terminal(), phase.allowed_transitions().is_empty());
        }
    }
}
