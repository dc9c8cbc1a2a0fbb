use std::fmt;

/// Steps of one `plan_task` run, in the only order they may occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    FetchingKnowledge,
    Generating,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanState::FetchingKnowledge => write!(f, "FetchingKnowledge"),
            PlanState::Generating => write!(f, "Generating"),
            PlanState::Persisting => write!(f, "Persisting"),
            PlanState::Done => write!(f, "Done"),
            PlanState::Failed => write!(f, "Failed"),
        }
    }
}
