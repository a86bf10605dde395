//! # tally-core
//!
//! Foundation crate for the Tally reconciliation engine.
//! Defines all types, traits, errors, config, events, and constants.
//! Every other crate in the workspace depends on this.

pub mod cancel;
pub mod coerce;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod traits;
pub mod types;

// Re-export the most commonly used items at the crate root.
pub use cancel::RunCancellation;
pub use config::EngineConfig;
pub use errors::error_code::TallyErrorCode;
pub use events::dispatcher::EventDispatcher;
pub use events::handler::TallyEventHandler;
pub use types::collections::{FxHashMap, FxHashSet};
pub use types::combination::Combination;
pub use types::run::{DiscoveryMode, Run, RunParams, RunStage, RunStatus, StageKind, StageStatus};
pub use types::side::Side;
