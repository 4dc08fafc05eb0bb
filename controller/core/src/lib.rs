//! Core model for the load balancer controller.
//!
//! A reconcile builds a [`Stack`] of desired cloud resources for one logical
//! group, the diff engine pairs those resources with tag-discovered actual
//! state, and the deployer walks the stack's dependency graph issuing the
//! resulting creates, modifies, and deletes. Cross-resource references are
//! expressed as [`StringToken`]s resolved from resource status at deploy
//! time, so the model itself stays an acyclic value graph.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod diff;
mod error;
mod resource;
mod stack;
mod token;

pub mod cloud;
pub mod model;
pub mod tags;

#[cfg(test)]
mod tests;

pub use self::{
    diff::{partition, Partition},
    error::{Error, ErrorCategory, Result},
    resource::{ResourceId, ResourceKind, ResourceSpec, ResourceStatus, StatusField},
    stack::{Stack, StackId},
    token::StringToken,
};
