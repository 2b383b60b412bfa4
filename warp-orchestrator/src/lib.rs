//! Orchestration stages: Designer, Executor, Interaction and Optimizer
//! (spec §4.5-§4.8), wired together into a per-session task by
//! [`session`].

pub mod designer;
pub mod executor;
pub mod interaction;
pub mod optimizer;
pub mod session;

pub use designer::DesignerStage;
pub use executor::{ExecutorOutcome, ExecutorStage, StepOutcome};
pub use interaction::InteractionHub;
pub use optimizer::{OptimizerOutcome, OptimizerStage};
pub use session::{SessionDeps, SessionRuntime};
