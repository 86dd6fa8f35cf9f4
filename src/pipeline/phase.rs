//! The four processing phases and their state machine.
//!
//! Phases are strictly sequential; each depends on the previous phase's
//! persisted output. The pipeline is modeled as an explicit tagged state
//! rather than implicit control flow, so transitions can be validated.

use serde::{Deserialize, Serialize};

/// One of the four sequential AI-processing phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Per-page image description of the source document.
    VisualAnalysis,
    /// Structured field extraction from the visual output.
    DataExtraction,
    /// Chapter/question scoring against the analysis template.
    TemplateProcessing,
    /// Domain-specific secondary analyses; runs last because it depends on
    /// all prior outputs.
    SpecializedAnalysis,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 4] = [
        Phase::VisualAnalysis,
        Phase::DataExtraction,
        Phase::TemplateProcessing,
        Phase::SpecializedAnalysis,
    ];

    /// Returns the step name recorded in progress events.
    pub fn step_name(&self) -> &'static str {
        match self {
            Phase::VisualAnalysis => "visual_analysis",
            Phase::DataExtraction => "data_extraction",
            Phase::TemplateProcessing => "template_processing",
            Phase::SpecializedAnalysis => "specialized_analysis",
        }
    }

    /// Returns the next phase, or `None` after the last one.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::VisualAnalysis => Some(Phase::DataExtraction),
            Phase::DataExtraction => Some(Phase::TemplateProcessing),
            Phase::TemplateProcessing => Some(Phase::SpecializedAnalysis),
            Phase::SpecializedAnalysis => None,
        }
    }

    /// Returns the overall-progress band `(start, end)` this phase owns.
    ///
    /// Each phase covers a quarter of the task's 0-100 range.
    pub fn progress_span(&self) -> (i16, i16) {
        match self {
            Phase::VisualAnalysis => (0, 25),
            Phase::DataExtraction => (25, 50),
            Phase::TemplateProcessing => (50, 75),
            Phase::SpecializedAnalysis => (75, 100),
        }
    }

    /// Zero-based position in the execution order.
    pub fn index(&self) -> usize {
        match self {
            Phase::VisualAnalysis => 0,
            Phase::DataExtraction => 1,
            Phase::TemplateProcessing => 2,
            Phase::SpecializedAnalysis => 3,
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visual_analysis" => Ok(Phase::VisualAnalysis),
            "data_extraction" => Ok(Phase::DataExtraction),
            "template_processing" => Ok(Phase::TemplateProcessing),
            "specialized_analysis" => Ok(Phase::SpecializedAnalysis),
            other => Err(format!("unknown phase '{}'", other)),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.step_name())
    }
}

/// Explicit pipeline state for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "phase")]
pub enum PipelineState {
    /// Claimed but no phase dispatched yet.
    Queued,
    /// The named phase is executing.
    Running(Phase),
    /// All phases finished.
    Completed,
    /// A phase failed or retries were exhausted.
    Failed,
}

impl PipelineState {
    /// Returns whether `next` is a legal successor of this state.
    ///
    /// Legal transitions: `Queued` enters phase 1; a running phase moves to
    /// its direct successor, to `Completed` (only from the last phase), or
    /// to `Failed`; terminal states accept nothing.
    pub fn can_transition(&self, next: &PipelineState) -> bool {
        match (self, next) {
            (PipelineState::Queued, PipelineState::Running(Phase::VisualAnalysis)) => true,
            (PipelineState::Queued, PipelineState::Failed) => true,
            (PipelineState::Running(current), PipelineState::Running(upcoming)) => {
                current.next() == Some(*upcoming)
            }
            (PipelineState::Running(Phase::SpecializedAnalysis), PipelineState::Completed) => true,
            (PipelineState::Running(_), PipelineState::Failed) => true,
            _ => false,
        }
    }

    /// Applies a transition, or reports the invalid pair.
    pub fn transition(self, next: PipelineState) -> Result<PipelineState, String> {
        if self.can_transition(&next) {
            Ok(next)
        } else {
            Err(format!("invalid transition {:?} -> {:?}", self, next))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert_eq!(Phase::VisualAnalysis.next(), Some(Phase::DataExtraction));
        assert_eq!(Phase::DataExtraction.next(), Some(Phase::TemplateProcessing));
        assert_eq!(
            Phase::TemplateProcessing.next(),
            Some(Phase::SpecializedAnalysis)
        );
        assert_eq!(Phase::SpecializedAnalysis.next(), None);
    }

    #[test]
    fn test_phase_all_matches_next_chain() {
        let mut walked = vec![Phase::ALL[0]];
        while let Some(next) = walked.last().unwrap().next() {
            walked.push(next);
        }

        assert_eq!(walked, Phase::ALL.to_vec());
    }

    #[test]
    fn test_phase_spans_cover_full_range() {
        let mut cursor = 0;
        for phase in Phase::ALL {
            let (start, end) = phase.progress_span();
            assert_eq!(start, cursor);
            assert!(end > start);
            cursor = end;
        }
        assert_eq!(cursor, 100);
    }

    #[test]
    fn test_phase_roundtrip() {
        for phase in Phase::ALL {
            let parsed: Phase = phase.step_name().parse().unwrap();
            assert_eq!(parsed, phase);
        }
    }

    #[test]
    fn test_phase_parse_unknown() {
        assert!("quantum_analysis".parse::<Phase>().is_err());
    }

    #[test]
    fn test_phase_serde_snake_case() {
        let json = serde_json::to_string(&Phase::VisualAnalysis).unwrap();
        assert_eq!(json, "\"visual_analysis\"");

        let parsed: Phase = serde_json::from_str("\"data_extraction\"").unwrap();
        assert_eq!(parsed, Phase::DataExtraction);
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut state = PipelineState::Queued;
        for phase in Phase::ALL {
            state = state.transition(PipelineState::Running(phase)).unwrap();
        }
        state = state.transition(PipelineState::Completed).unwrap();

        assert_eq!(state, PipelineState::Completed);
    }

    #[test]
    fn test_state_machine_rejects_phase_skip() {
        let state = PipelineState::Running(Phase::VisualAnalysis);

        assert!(!state.can_transition(&PipelineState::Running(Phase::TemplateProcessing)));
    }

    #[test]
    fn test_state_machine_rejects_early_completion() {
        let state = PipelineState::Running(Phase::DataExtraction);

        assert!(!state.can_transition(&PipelineState::Completed));
    }

    #[test]
    fn test_state_machine_allows_failure_anywhere() {
        for phase in Phase::ALL {
            let state = PipelineState::Running(phase);
            assert!(state.can_transition(&PipelineState::Failed));
        }
    }

    #[test]
    fn test_state_machine_terminal_states_are_final() {
        for terminal in [PipelineState::Completed, PipelineState::Failed] {
            assert!(!terminal.can_transition(&PipelineState::Queued));
            assert!(!terminal.can_transition(&PipelineState::Running(Phase::VisualAnalysis)));
        }
    }

    #[test]
    fn test_transition_error_message() {
        let err = PipelineState::Completed
            .transition(PipelineState::Failed)
            .unwrap_err();

        assert!(err.contains("invalid transition"));
    }
}
