//! Security Controller CRD Definitions
//!
//! The `Configuration` custom resource describes the container settings that
//! remediation applies to flagged workloads. The annotation keys shared by the
//! two reconcilers live in [`annotations`].

pub mod annotations;
pub mod configuration;
pub mod quantity;

pub use annotations::*;
pub use configuration::*;
