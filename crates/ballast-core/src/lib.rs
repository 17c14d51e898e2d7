// crates/ballast-core/src/lib.rs
//
// ballast-core: Core types, policy, errors, events, and collaborator traits
// for the Ballast power ledger.
//
// This is the leaf crate that the engine and the CLI depend on. It defines
// the identifiers and scalar types used for power accounting, the decay
// policy, the protocol-wide error type, the domain events, and the trait
// interfaces for the external collaborators (epoch clock, commodity ledger,
// position ledger) and for power consumers.

pub mod error;
pub mod events;
pub mod policy;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use ballast_core::StakeId;`

// Identifier and scalar types
pub use types::{AccountId, Amount, Epoch, Power, StakeId};

// Policy
pub use policy::PowerPolicy;

// Events
pub use events::StakeEvent;

// Error type
pub use error::BallastError;

// Traits
pub use traits::{CommodityLedger, EpochClock, PositionLedger, PowerSource};
