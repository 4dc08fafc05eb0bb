//! The TargetGroupBinding reconciler.
//!
//! Watches TargetGroupBindings and the Services, Endpoints, and Nodes they
//! reference, projects the desired target set for each binding, and closes
//! the loop against the target group with register/deregister calls, never
//! touching targets it did not decide about.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod controller;
mod index;
pub mod targets;

#[cfg(test)]
mod tests;

pub use self::{
    controller::Controller,
    index::{BindingIndex, BindingRef, SharedBindingIndex},
};
