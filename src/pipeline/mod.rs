//! The orchestration engine: shared state, stages, and the driver that runs
//! them.

pub mod driver;
pub mod parallel;
pub mod stage;
pub mod state;

pub use driver::{Driver, Step, SubGraph};
pub use parallel::{CancelPolicy, ParallelGroup};
pub use stage::{FnStage, Stage, StageContext, StageOutcome, validate_outputs};
pub use state::{PartialUpdate, SharedState, StateSnapshot, fields};
