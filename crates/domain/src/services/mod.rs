//! Guard, clock, telemetry and the workflow orchestrator.

pub mod clock;
pub mod guard;
pub mod telemetry;
pub mod workflow;

pub use clock::*;
pub use guard::*;
pub use telemetry::*;
pub use workflow::*;
