//! Shared data model for the deskpilot orchestrator: plans and commands,
//! execution results, environment snapshots and deltas, orchestration events,
//! and the planner turn shapes.
//!
//! Everything in this crate is plain serde data plus pure helpers; no
//! subsystem logic lives here.

pub mod environment;
pub mod events;
pub mod plan;
pub mod planner;

pub use environment::Bounds;
pub use environment::EnvironmentDelta;
pub use environment::EnvironmentSnapshot;
pub use environment::WindowInfo;
pub use events::EventData;
pub use events::OrchestratorEvent;
pub use plan::Command;
pub use plan::ExecutionStatus;
pub use plan::Plan;
pub use plan::TaskExecutionResult;
pub use planner::EnvironmentalDataRequest;
pub use planner::InputKind;
pub use planner::PlannerResponse;
pub use planner::UserInteractionSpec;
