//! Outbound adapters: payment processors and fund sources.

pub mod funds;
pub mod psp;

pub use funds::StaticFundSource;
pub use psp::{PspRegistry, RateLimitedPsp, SimulatedPsp};
