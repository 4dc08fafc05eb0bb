//! Certificate intent.
//!
//! Explicit `certificate-arn` annotations attach as literals. Without them,
//! each TLS host gets an Amazon-issued certificate resource with DNS
//! validation; the listener references the eventual ARN through a token.

use crate::{builder::BuildContext, group::IngressGroupMember};
use alb_controller_core::{
    model::certificate::{CertificateSpec, CertificateType, ValidationMethod},
    ResourceSpec, Result, Stack, StackId, StatusField, StringToken,
};
use std::collections::BTreeMap;

/// Union of explicit certificate ARNs across the group, first-listed first
/// so the first ARN stays the listener default.
pub fn explicit_arns(live: &[&IngressGroupMember]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for member in live {
        for arn in member.annotations.certificate_arns.iter().flatten() {
            if !out.contains(arn) {
                out.push(arn.clone());
            }
        }
    }
    out
}

/// Distinct TLS hosts across the group, sorted for stable resource ids.
pub fn tls_hosts(live: &[&IngressGroupMember]) -> Vec<String> {
    let mut hosts: Vec<String> = live
        .iter()
        .flat_map(|member| member.tls_hosts.iter().cloned())
        .collect();
    hosts.sort();
    hosts.dedup();
    hosts
}

pub fn build_issued(
    stack: &mut Stack,
    ctx: &BuildContext<'_>,
    stack_id: &StackId,
    hosts: &[String],
    group_tags: &BTreeMap<String, String>,
) -> Result<Vec<StringToken>> {
    let mut tokens = Vec::new();
    for host in hosts {
        let id = stack.add(
            host.clone(),
            ResourceSpec::Certificate(CertificateSpec {
                cert_type: CertificateType::AmazonIssued,
                domain_name: host.clone(),
                subject_alternative_names: vec![host.clone()],
                validation_method: ValidationMethod::Dns,
                key_algorithm: None,
                certificate_authority_arn: None,
                tags: ctx.tags.resource_tags(stack_id, host, group_tags),
            }),
        )?;
        tokens.push(StringToken::reference(id, StatusField::Arn));
    }
    Ok(tokens)
}
