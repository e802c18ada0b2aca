#![forbid(unsafe_code)]

pub mod legacy;
pub mod service;
pub mod sync;

pub use service::EntitlementService;
pub use sync::SyncReconciler;

#[cfg(test)]
pub(crate) mod test_support;
