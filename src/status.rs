//! Status derivation: the single source of truth for mapping chunk states to
//! a task status.
//!
//! Both the worker-completion path and any consumer-triggered recompute call
//! `derive_status`; nothing else is allowed to decide a task's status from
//! chunks. The function is pure and deterministic, which makes re-derivation
//! after a crash idempotent.

use crate::model::{Chunk, ChunkStatus, ReviewReason, SourceType, TaskStatus};

/// Result of a derivation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derived {
    pub status: TaskStatus,
    pub review_reason: Option<ReviewReason>,
}

/// Derive a task's status from its chunk list.
///
/// Rules, in priority order:
/// 1. Non-empty and all chunks completed: manual tasks go straight to human
///    review (reason `completed`); everything else enters AI review.
/// 2. Any failed chunk escalates to human review (reason `errors`), even if
///    other chunks are still in progress.
/// 3. Any started or finished chunk means the task is in progress.
/// 4. No chunks, or all still pending: the caller's current status stands.
///
/// The review reason is recomputed from scratch on every call; a reason from
/// an earlier derivation is never carried over.
pub fn derive_status(
    chunks: &[Chunk],
    current_status: TaskStatus,
    source_type: SourceType,
) -> Derived {
    let all_completed =
        !chunks.is_empty() && chunks.iter().all(|c| c.status == ChunkStatus::Completed);
    if all_completed {
        return if source_type == SourceType::Manual {
            Derived {
                status: TaskStatus::HumanReview,
                review_reason: Some(ReviewReason::Completed),
            }
        } else {
            Derived {
                status: TaskStatus::AiReview,
                review_reason: None,
            }
        };
    }

    if chunks.iter().any(|c| c.status == ChunkStatus::Failed) {
        return Derived {
            status: TaskStatus::HumanReview,
            review_reason: Some(ReviewReason::Errors),
        };
    }

    let any_started = chunks
        .iter()
        .any(|c| matches!(c.status, ChunkStatus::InProgress | ChunkStatus::Completed));
    if any_started {
        return Derived {
            status: TaskStatus::InProgress,
            review_reason: None,
        };
    }

    Derived {
        status: current_status,
        review_reason: None,
    }
}

/// A task in human review that never completed a single chunk indicates the
/// worker crashed during planning, not a genuine review-ready state. The
/// corrective action is to (re)start the task, not to reset a stuck flag.
pub fn is_incomplete_human_review(status: TaskStatus, chunks: &[Chunk]) -> bool {
    status == TaskStatus::HumanReview
        && (chunks.is_empty()
            || !chunks.iter().any(|c| c.status == ChunkStatus::Completed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Chunk;

    fn chunks(statuses: &[ChunkStatus]) -> Vec<Chunk> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut c = Chunk::new(&format!("c{}", i), "chunk");
                c.status = *s;
                c
            })
            .collect()
    }

    #[test]
    fn all_completed_manual_goes_to_human_review() {
        let cs = chunks(&[
            ChunkStatus::Completed,
            ChunkStatus::Completed,
            ChunkStatus::Completed,
        ]);
        let d = derive_status(&cs, TaskStatus::InProgress, SourceType::Manual);
        assert_eq!(d.status, TaskStatus::HumanReview);
        assert_eq!(d.review_reason, Some(ReviewReason::Completed));
    }

    #[test]
    fn all_completed_non_manual_goes_to_ai_review() {
        let cs = chunks(&[ChunkStatus::Completed, ChunkStatus::Completed]);
        for source in [SourceType::Ideation, SourceType::Roadmap] {
            let d = derive_status(&cs, TaskStatus::InProgress, source);
            assert_eq!(d.status, TaskStatus::AiReview);
            assert_eq!(d.review_reason, None);
        }
    }

    #[test]
    fn any_failure_escalates_to_human_review() {
        let cs = chunks(&[
            ChunkStatus::Completed,
            ChunkStatus::Failed,
            ChunkStatus::Pending,
        ]);
        let d = derive_status(&cs, TaskStatus::InProgress, SourceType::Ideation);
        assert_eq!(d.status, TaskStatus::HumanReview);
        assert_eq!(d.review_reason, Some(ReviewReason::Errors));
    }

    #[test]
    fn failure_overrides_in_progress_chunks() {
        let cs = chunks(&[
            ChunkStatus::InProgress,
            ChunkStatus::InProgress,
            ChunkStatus::Failed,
        ]);
        let d = derive_status(&cs, TaskStatus::InProgress, SourceType::Manual);
        assert_eq!(d.status, TaskStatus::HumanReview);
        assert_eq!(d.review_reason, Some(ReviewReason::Errors));
    }

    #[test]
    fn partial_progress_is_in_progress() {
        let cs = chunks(&[ChunkStatus::Completed, ChunkStatus::Pending]);
        let d = derive_status(&cs, TaskStatus::Backlog, SourceType::Manual);
        assert_eq!(d.status, TaskStatus::InProgress);
        assert_eq!(d.review_reason, None);

        let cs = chunks(&[ChunkStatus::InProgress, ChunkStatus::Pending]);
        let d = derive_status(&cs, TaskStatus::Backlog, SourceType::Manual);
        assert_eq!(d.status, TaskStatus::InProgress);
    }

    #[test]
    fn no_chunks_preserves_current_status() {
        let d = derive_status(&[], TaskStatus::Backlog, SourceType::Manual);
        assert_eq!(d.status, TaskStatus::Backlog);
        let d = derive_status(&[], TaskStatus::HumanReview, SourceType::Manual);
        assert_eq!(d.status, TaskStatus::HumanReview);
    }

    #[test]
    fn all_pending_preserves_current_status() {
        let cs = chunks(&[ChunkStatus::Pending, ChunkStatus::Pending]);
        let d = derive_status(&cs, TaskStatus::Backlog, SourceType::Ideation);
        assert_eq!(d.status, TaskStatus::Backlog);
        assert_eq!(d.review_reason, None);
    }

    #[test]
    fn derivation_is_deterministic() {
        let cs = chunks(&[ChunkStatus::Completed, ChunkStatus::Failed]);
        let a = derive_status(&cs, TaskStatus::InProgress, SourceType::Manual);
        let b = derive_status(&cs, TaskStatus::InProgress, SourceType::Manual);
        assert_eq!(a, b);
    }

    #[test]
    fn retried_failure_clears_review_reason() {
        // A chunk that was failed and is retried back to in_progress must
        // re-derive with no carried-over reason.
        let cs = chunks(&[ChunkStatus::InProgress, ChunkStatus::Pending]);
        let d = derive_status(&cs, TaskStatus::HumanReview, SourceType::Manual);
        assert_eq!(d.status, TaskStatus::InProgress);
        assert_eq!(d.review_reason, None);
    }

    #[test]
    fn incomplete_human_review_empty_chunks() {
        assert!(is_incomplete_human_review(TaskStatus::HumanReview, &[]));
    }

    #[test]
    fn incomplete_human_review_zero_completed() {
        let cs = chunks(&[ChunkStatus::Pending, ChunkStatus::Failed]);
        assert!(is_incomplete_human_review(TaskStatus::HumanReview, &cs));
    }

    #[test]
    fn incomplete_human_review_false_cases() {
        let cs = chunks(&[ChunkStatus::Completed]);
        assert!(!is_incomplete_human_review(TaskStatus::HumanReview, &cs));
        assert!(!is_incomplete_human_review(TaskStatus::InProgress, &[]));
        assert!(!is_incomplete_human_review(TaskStatus::Done, &[]));
    }
}
