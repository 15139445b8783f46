//! Execution progress: merging partial worker updates into a single weighted
//! 0-100 value with fixed per-phase bands.

use crate::model::{ExecutionPhase, ExecutionProgress, Task};

/// Percentage band (lower, upper) for a phase, used as a display anchor and
/// sanity bound. `idle` and `failed` are unbanded.
pub fn phase_band(phase: ExecutionPhase) -> Option<(u8, u8)> {
    match phase {
        ExecutionPhase::Planning => Some((0, 20)),
        ExecutionPhase::Coding => Some((20, 80)),
        ExecutionPhase::QaReview | ExecutionPhase::QaFixing => Some((80, 95)),
        ExecutionPhase::Complete => Some((95, 100)),
        ExecutionPhase::Idle | ExecutionPhase::Failed => None,
    }
}

/// Merge a partial update into `current`. Fields absent from the update keep
/// their previous values. While the phase is active and not `failed`,
/// `overall_progress` never decreases: a stale or out-of-order update clamps
/// to the previous value. Banded phases clamp the overall value into their
/// band.
pub fn merge(current: &ExecutionProgress, update: &ExecutionProgress) -> ExecutionProgress {
    let phase = update.phase.or(current.phase);

    let mut overall = update.overall_progress.or(current.overall_progress);
    if let Some(p) = phase
        && p != ExecutionPhase::Idle
        && p != ExecutionPhase::Failed
    {
        if let (Some(new), Some(old)) = (update.overall_progress, current.overall_progress)
            && new < old
        {
            overall = Some(old);
        }
        if let (Some(value), Some((lo, hi))) = (overall, phase_band(p)) {
            overall = Some(value.clamp(lo, hi));
        }
    }

    ExecutionProgress {
        phase,
        phase_progress: update
            .phase_progress
            .or(current.phase_progress)
            .map(|p| p.min(100)),
        overall_progress: overall,
        message: update.message.clone().or_else(|| current.message.clone()),
        current_chunk: update
            .current_chunk
            .clone()
            .or_else(|| current.current_chunk.clone()),
    }
}

/// True iff the worker is actively executing: a phase is set and it is not
/// idle, complete, or failed.
pub fn has_active_execution(progress: &ExecutionProgress) -> bool {
    matches!(
        progress.phase,
        Some(
            ExecutionPhase::Planning
                | ExecutionPhase::Coding
                | ExecutionPhase::QaReview
                | ExecutionPhase::QaFixing
        )
    )
}

/// Consumer-facing progress value. The tracker never derives overall progress
/// from chunk counts itself; when the worker has not asserted one, fall back
/// to the completed-chunk ratio.
pub fn display_progress(task: &Task) -> u8 {
    if let Some(overall) = task.execution_progress.overall_progress {
        return overall.min(100);
    }
    if task.chunks.is_empty() {
        return 0;
    }
    ((task.completed_chunks() * 100) / task.chunks.len()) as u8
}
