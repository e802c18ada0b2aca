#![forbid(unsafe_code)]

pub mod experiment;
pub mod license;
pub mod project;
pub mod quota;
pub mod trial;

#[cfg(test)]
pub(crate) mod test_support;
