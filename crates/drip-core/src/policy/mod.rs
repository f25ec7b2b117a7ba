//! Run policies: pure decisions with no I/O.

pub mod governor;
pub mod mix;
pub mod pacing;
pub mod retry;
pub mod rotation;
pub mod suppression;
pub mod window;

pub use governor::{ErrorRateGovernor, GovernorVerdict};
pub use mix::{DEFAULT_RATIO, SendMix};
pub use pacing::Pacer;
pub use retry::RetryPolicy;
pub use rotation::RotationPolicy;
pub use suppression::{Blocked, Suppression};
pub use window::SendWindow;
