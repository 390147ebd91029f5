//! gaffer — autonomous planner/executor orchestrator.
//!
//! A planner agent is invoked each cycle and emits an execution graph; the
//! driver traverses it, running every ready node through a
//! software/content/discovery handler that spawns a domain-appropriate
//! agent CLI in an isolated workspace. Software work lands on mainline via
//! a two-phase conflict-aware merge, results are checkpointed after every
//! node, and the next planner cycle receives a categorized account of what
//! happened. Crashed or interrupted runs resume from the checkpoint keyed
//! by the canonical graph hash.

pub mod agent;
pub mod context;
pub mod domain;
pub mod driver;
pub mod error;
pub mod git;
pub mod handlers;
pub mod model_config;
pub mod project;
pub mod shutdown;
pub mod signal;

pub use driver::{Orchestrator, OrchestratorConfig};
pub use error::{GafferError, Result};
pub use project::ProjectLayout;
pub use shutdown::ShutdownFlag;
