//! Core data model for loc-census.
//!
//! These types describe a repository on its way through the census:
//! discovered as a descriptor, bound to a commit as a target, and
//! settled as an analysis result.

mod descriptor;
mod result;
mod target;

pub use descriptor::RepoDescriptor;
pub use result::{AnalysisResult, LineStats, reason};
pub use target::AnalysisTarget;
