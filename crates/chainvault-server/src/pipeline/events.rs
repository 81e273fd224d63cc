//! Progress events published after every acknowledged ledger change

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::chain::Network;
use crate::models::{Job, JobState};

/// Buffered events per subscriber before it starts lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The job changed state
    Transition,
    /// An anchor gained confirmations; the job state is unchanged
    Confirmation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub kind: EventKind,
    pub job_id: Uuid,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<JobState>,
    pub version: i64,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn transition(job: &Job, previous: Option<JobState>) -> Self {
        Self {
            kind: EventKind::Transition,
            job_id: job.id,
            state: job.state,
            previous,
            version: job.version,
            progress: job.state.progress(),
            network: None,
            confirmations: None,
            detail: job.error.clone(),
            at: job.updated_at,
        }
    }

    /// Confirmation progress of an anchor. `state` is the job's state, which
    /// is `Confirmed` when an already confirmed job is anchored on another network.
    pub fn confirmation(
        job_id: Uuid,
        state: JobState,
        network: Network,
        confirmations: u64,
        required: u64,
    ) -> Self {
        let progress = match state {
            JobState::Anchoring => anchoring_progress(confirmations, required),
            other => other.progress(),
        };
        Self {
            kind: EventKind::Confirmation,
            job_id,
            state,
            previous: None,
            version: 0,
            progress,
            network: Some(network),
            confirmations: Some(confirmations),
            detail: Some(format!("{}/{} confirmations", confirmations, required)),
            at: Utc::now(),
        }
    }

    /// SSE event name
    pub fn event_name(&self) -> &'static str {
        match self.kind {
            EventKind::Transition => "transition",
            EventKind::Confirmation => "confirmation",
        }
    }
}

/// Anchoring covers 80..99 percent, scaled by confirmation depth
fn anchoring_progress(confirmations: u64, required: u64) -> u8 {
    let base = JobState::Anchoring.progress() as u64;
    let span = (JobState::Confirmed.progress() as u64 - base).saturating_sub(1);
    if required == 0 {
        return (base + span) as u8;
    }
    (base + span * confirmations.min(required) / required) as u8
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_anchoring_progress_stays_below_done() {
        assert_eq!(anchoring_progress(0, 12), 80);
        assert_eq!(anchoring_progress(6, 12), 89);
        assert_eq!(anchoring_progress(12, 12), 99);
        assert_eq!(anchoring_progress(50, 12), 99);
        assert_eq!(anchoring_progress(0, 0), 99);
    }

    #[test]
    fn test_confirmation_event_shape() {
        let event = ProgressEvent::confirmation(Uuid::nil(), JobState::Anchoring, Network::Bsc, 3, 15);
        let json = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(json["kind"], "confirmation");
        assert_eq!(json["network"], "bsc");
        assert_eq!(json["confirmations"], 3);
        assert_eq!(json["progress"], 80);
        assert!(json.get("previous").is_none());
    }

    #[test]
    fn test_confirmation_on_confirmed_job_reports_done() {
        let event = ProgressEvent::confirmation(Uuid::nil(), JobState::Confirmed, Network::Avalanche, 1, 1);
        assert_eq!(event.progress, 100);
        assert_eq!(event.event_name(), "confirmation");
    }
}
