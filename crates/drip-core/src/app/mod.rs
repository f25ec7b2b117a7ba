//! Application layer: the pieces a scheduled send run is assembled from.
//!
//! - `ClaimEngine`: one atomic claim per call, transient failures retried
//! - `EligibilityFilter`: fresh eligible-inbox set per decision
//! - `SendOrchestrator`: the run state machine
//! - `OrchestratorBuilder`: fail-fast wiring
//! - `Reaper`: reconciliation of abandoned `sending` rows
//! - `StatusView`: queue and inbox snapshot for operators

pub mod builder;
pub mod claim;
pub mod eligibility;
pub mod orchestrator;
pub mod reaper;
pub mod settings;
pub mod status;

pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::claim::ClaimEngine;
pub use self::eligibility::{EligibilityFilter, EligibleSet};
pub use self::orchestrator::{RunState, SendOrchestrator};
pub use self::reaper::Reaper;
pub use self::settings::RunSettings;
pub use self::status::{InboxStatus, StatusView};
