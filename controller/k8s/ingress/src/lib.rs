//! Ingress intake: annotation parsing, group membership, and the model
//! builder that turns routing intent into a desired resource stack.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod builder;
pub mod certificates;
pub mod config;
pub mod group;
pub mod rules;
pub mod security_groups;


pub use self::{
    annotations::{IngressAnnotations, ListenerOverride},
    builder::{build_stack, BuildContext, BuildDefaults, ServicePortSummary, ServiceSummary},
    group::{
        GroupIndex, GroupKey, GroupMembers, IngressGroupMember, InvalidMember, SharedGroupIndex,
    },
};
