mod planner;
mod state;

pub use planner::{CheckListError, Durability, PlanError, PlanOutcome, PlanWorkflow};
pub use state::PlanState;
