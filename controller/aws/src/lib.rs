//! AWS-backed implementations of the cloud contract.
//!
//! Everything SDK-shaped lives here: the four service adapters, the
//! tag-lookup cache that keeps certificate discovery cheap, and the bounded
//! polling loops the deployer leans on for asynchronous cloud state.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod acm;
pub mod cache;
pub mod ec2;
pub mod elbv2;
pub mod poll;
pub mod route53;

pub use self::{
    cache::TtlCache,
    poll::{retry_while, wait_for, PollSettings},
};

use alb_controller_core::cloud::Cloud;
use std::{sync::Arc, time::Duration};

/// Builds the full cloud bundle from ambient AWS configuration (environment,
/// instance profile, or shared config file).
pub async fn cloud_from_env(acm_tag_ttl: Duration) -> Cloud {
    let config = aws_config::load_from_env().await;
    Cloud {
        elbv2: Arc::new(elbv2::Elbv2::new(&config)),
        ec2: Arc::new(ec2::Ec2::new(&config)),
        acm: Arc::new(acm::Acm::new(&config, acm_tag_ttl)),
        dns: Arc::new(route53::Route53::new(&config)),
    }
}
