use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CertificateType {
    AmazonIssued,
    Private,
    Imported,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValidationMethod {
    Dns,
    Email,
}

/// Desired state of an ACM certificate. Identity is the stack-scoped logical
/// id; the ARN only exists once ACM has accepted the request.
#[derive(Clone, Debug, PartialEq)]
pub struct CertificateSpec {
    pub cert_type: CertificateType,
    pub domain_name: String,
    pub subject_alternative_names: Vec<String>,
    pub validation_method: ValidationMethod,
    pub key_algorithm: Option<String>,
    pub certificate_authority_arn: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl CertificateSpec {
    /// The full SAN set, with the primary domain included, as the identity
    /// of the issued certificate. Drift here forces re-issue.
    pub fn san_set(&self) -> Vec<String> {
        let mut sans = self.subject_alternative_names.clone();
        if !sans.contains(&self.domain_name) {
            sans.push(self.domain_name.clone());
        }
        sans.sort();
        sans.dedup();
        sans
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateStatus {
    pub arn: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CertificateState {
    PendingValidation,
    Issued,
    Failed,
    Other(String),
}

/// A DNS record ACM asks us to publish to prove domain ownership.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationRecord {
    pub domain_name: String,
    pub name: String,
    pub record_type: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObservedCertificate {
    pub arn: String,
    pub domain_name: String,
    pub subject_alternative_names: Vec<String>,
    pub state: CertificateState,
    pub created_at: Option<DateTime<Utc>>,
    pub validation_records: Vec<ValidationRecord>,
    pub tags: BTreeMap<String, String>,
}

impl ObservedCertificate {
    pub fn san_set(&self) -> Vec<String> {
        let mut sans = self.subject_alternative_names.clone();
        if !sans.contains(&self.domain_name) {
            sans.push(self.domain_name.clone());
        }
        sans.sort();
        sans.dedup();
        sans
    }
}

/// Whether a matched certificate must be replaced: drift in the SAN set, or
/// a certificate still pending validation past the reissue window.
pub fn needs_replacement(
    desired: &CertificateSpec,
    actual: &ObservedCertificate,
    now: DateTime<Utc>,
    reissue_wait: chrono::Duration,
) -> bool {
    if desired.san_set() != actual.san_set() {
        return true;
    }
    if actual.state == CertificateState::PendingValidation {
        if let Some(created_at) = actual.created_at {
            return created_at + reissue_wait <= now;
        }
    }
    false
}
