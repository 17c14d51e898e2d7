// crates/ballast-power/src/lib.rs
//
// ballast-power: the epoch-based power-accounting engine.
//
// Stakers lock a quantized commodity for a chosen number of epochs and earn
// power that decays in yearly steps as the lockup runs down. Power is stored
// as signed per-epoch deltas and folded into absolute values on demand, so
// queries at any past, current, or future epoch stay cheap without a
// background job.

pub mod beneficiary;
pub mod decay;
pub mod engine;
pub mod ledger;
pub mod memory;
pub mod registry;
pub mod revenue;

// Re-export key types for ergonomic access from downstream crates.
pub use beneficiary::BeneficiaryDelegationLedger;
pub use decay::DecayCurve;
pub use engine::PowerEngine;
pub use ledger::EpochDeltaLedger;
pub use memory::{InMemoryCommodityLedger, InMemoryPositionLedger, ManualEpochClock};
pub use registry::{Stake, StakeRegistry, StakeState, SupersedeReason};
pub use revenue::RevenueApportioner;
