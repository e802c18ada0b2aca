#![forbid(unsafe_code)]

pub mod common;
pub mod config;
pub mod experiment;
pub mod license;
pub mod project;
pub mod quota;
pub mod sync;
pub mod trial;
pub mod version;

pub use common::{
    Clock, ContractViolation, MachineId, ManualClock, SeedSource, StateSource,
    SystemClock, Validate,
};
pub use config::EntitlementConfig;
pub use version::ClientVersion;
