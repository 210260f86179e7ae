//! Stage-ordering checks for the three-stage pipeline.
//!
//! Stage status is backend-authoritative. These functions only flag
//! snapshots that break the ordering rule; they never rewrite a status.

use std::fmt;

use pipetrack_shared::{Result, Session, StageId, StageStatus, StageTarget, TrackerError};

/// A stage that is running or completed while its predecessor is not completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageViolation {
    pub stage: StageId,
    pub status: StageStatus,
    pub predecessor: StageId,
    pub predecessor_status: StageStatus,
}

impl fmt::Display for StageViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is {} but {} is {}",
            self.stage, self.status, self.predecessor, self.predecessor_status
        )
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub session_id: String,
    pub violations: Vec<StageViolation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check the stage-ordering invariant: stage N may be `running` or
/// `completed` only if stage N-1 is `completed`.
pub fn validate(session: &Session) -> ValidationReport {
    let violations = StageId::ALL
        .iter()
        .filter_map(|&id| {
            let predecessor = id.predecessor()?;
            let stage = session.stage(id);
            let before = session.stage(predecessor);
            (stage.status.is_started() && before.status != StageStatus::Completed).then(|| {
                StageViolation {
                    stage: id,
                    status: stage.status,
                    predecessor,
                    predecessor_status: before.status,
                }
            })
        })
        .collect();

    ValidationReport {
        session_id: session.session_id.clone(),
        violations,
    }
}

/// Whether a manual "start stage" action is possible: the preceding stage
/// is `completed` and the target stage is still `pending`.
pub fn can_trigger_stage(session: &Session, target: StageTarget) -> bool {
    check_stage_trigger(session, target).is_ok()
}

/// Like [`can_trigger_stage`], but says why not.
pub fn check_stage_trigger(session: &Session, target: StageTarget) -> Result<()> {
    let id = target.stage();
    let stage = session.stage(id);
    let Some(predecessor) = id.predecessor() else {
        return Err(not_ready(target, "stage has no predecessor"));
    };
    let before = session.stage(predecessor);

    if before.status != StageStatus::Completed {
        return Err(not_ready(
            target,
            format!("{predecessor} is {}, not completed", before.status),
        ));
    }
    if stage.status != StageStatus::Pending {
        return Err(not_ready(target, format!("{id} is already {}", stage.status)));
    }
    Ok(())
}

fn not_ready(target: StageTarget, reason: impl Into<String>) -> TrackerError {
    TrackerError::StageNotReady {
        stage: target.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipetrack_shared::SessionStatus;

    const ALL_STATUSES: [StageStatus; 4] = [
        StageStatus::Pending,
        StageStatus::Running,
        StageStatus::Completed,
        StageStatus::Error,
    ];

    fn session(s1: StageStatus, s2: StageStatus, s3: StageStatus) -> Session {
        Session::new("s-1", SessionStatus::Active)
            .with_stage(StageId::Stage1, s1)
            .with_stage(StageId::Stage2, s2)
            .with_stage(StageId::Stage3, s3)
    }

    #[test]
    fn ordered_session_is_valid() {
        use StageStatus::*;
        assert!(validate(&session(Pending, Pending, Pending)).is_valid());
        assert!(validate(&session(Running, Pending, Pending)).is_valid());
        assert!(validate(&session(Completed, Running, Pending)).is_valid());
        assert!(validate(&session(Completed, Completed, Completed)).is_valid());
        assert!(validate(&session(Error, Pending, Pending)).is_valid());
    }

    #[test]
    fn out_of_order_stage_is_flagged_not_corrected() {
        use StageStatus::*;
        let s = session(Pending, Completed, Pending);
        let report = validate(&s);

        assert!(!report.is_valid());
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].stage, StageId::Stage2);
        assert_eq!(report.violations[0].to_string(), "stage2 is completed but stage1 is pending");
        // The session itself is untouched.
        assert_eq!(s.stage(StageId::Stage2).status, Completed);
        assert_eq!(s.stage(StageId::Stage1).status, Pending);
    }

    #[test]
    fn both_dependent_stages_can_violate() {
        use StageStatus::*;
        let report = validate(&session(Running, Running, Running));
        let stages: Vec<_> = report.violations.iter().map(|v| v.stage).collect();
        assert_eq!(stages, vec![StageId::Stage2, StageId::Stage3]);
    }

    #[test]
    fn stage2_trigger_only_when_stage1_completed_and_stage2_pending() {
        for s1 in ALL_STATUSES {
            for s2 in ALL_STATUSES {
                let s = session(s1, s2, StageStatus::Pending);
                let expected = s1 == StageStatus::Completed && s2 == StageStatus::Pending;
                assert_eq!(
                    can_trigger_stage(&s, StageTarget::Stage2),
                    expected,
                    "stage1={s1} stage2={s2}"
                );
            }
        }
    }

    #[test]
    fn stage3_trigger_depends_on_stage2() {
        use StageStatus::*;
        assert!(can_trigger_stage(&session(Completed, Completed, Pending), StageTarget::Stage3));
        assert!(!can_trigger_stage(&session(Completed, Running, Pending), StageTarget::Stage3));
        assert!(!can_trigger_stage(&session(Completed, Completed, Running), StageTarget::Stage3));
    }

    #[test]
    fn trigger_rejection_explains_why() {
        use StageStatus::*;
        let err = check_stage_trigger(&session(Running, Pending, Pending), StageTarget::Stage2)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "stage2 cannot be started: stage1 is running, not completed"
        );
    }
}
