//! Certificate lifecycle.
//!
//! Certificates synthesize ahead of the stack walk so listeners can bind
//! issued ARNs, and orphans are deleted only after the walk has moved every
//! listener reference off them. A certificate still pending validation past
//! the reissue window is stale: a fresh request replaces it and the stale
//! one joins the deferred deletions.

use crate::stack::{resource_id, DeployReport, EventVerb, StackDeployer};
use alb_controller_aws::{retry_while, wait_for, PollSettings};
use alb_controller_core::{
    model::certificate::{
        needs_replacement, CertificateSpec, CertificateState, CertificateStatus, CertificateType,
        ObservedCertificate, ValidationMethod, ValidationRecord,
    },
    partition, Error, ResourceId, ResourceKind, ResourceSpec, ResourceStatus, Result, Stack,
};
use std::time::Duration;

const VALIDATION_RECORD_TTL: i64 = 60;

pub(crate) async fn synthesize(
    deployer: &StackDeployer<'_>,
    stack: &mut Stack,
    report: &mut DeployReport,
) -> Result<Vec<ObservedCertificate>> {
    let stack_id = stack.id().clone();

    let ids: Vec<ResourceId> = stack
        .resources_of(ResourceKind::Certificate)
        .cloned()
        .collect();
    let desired: Vec<(ResourceId, CertificateSpec)> = ids
        .into_iter()
        .filter_map(|id| match stack.spec(&id) {
            Some(ResourceSpec::Certificate(spec)) => Some((id, spec.clone())),
            _ => None,
        })
        .collect();

    // Discovery runs even with nothing desired: certificates tagged to this
    // stack but no longer wanted must still be swept.
    let filters = [
        deployer.tags.stack_filter(&stack_id),
        deployer.tags.stack_filter_legacy(&stack_id),
    ];
    let mut actual: Vec<ObservedCertificate> = Vec::new();
    for filter in &filters {
        for cert in deployer.cloud.acm.find_certificates(filter).await? {
            if !actual.iter().any(|existing| existing.arn == cert.arn) {
                actual.push(cert);
            }
        }
    }

    let part = partition(
        desired,
        actual,
        |(id, _)| id.name.clone(),
        |a| resource_id(&a.tags),
        |a| a.arn.clone(),
    );
    let mut pending_delete = part.unmatched_actual;
    let now = chrono::Utc::now();

    for ((id, spec), actual) in part.matched {
        if needs_replacement(&spec, &actual, now, deployer.config.reissue_wait) {
            tracing::info!(certificate = %id.name, arn = %actual.arn, "Replacing stale certificate");
            let arn = request(deployer, &spec, report).await?;
            let issued = wait_issued(deployer, &arn).await?;
            stack.set_status(
                &id,
                ResourceStatus::Certificate(CertificateStatus { arn: issued.arn }),
            )?;
            pending_delete.push(actual);
        } else {
            // A matched-but-pending certificate inside the reissue window is
            // waited on, never re-issued.
            let observed = if actual.state == CertificateState::PendingValidation {
                wait_issued(deployer, &actual.arn).await?
            } else {
                actual
            };
            stack.set_status(
                &id,
                ResourceStatus::Certificate(CertificateStatus { arn: observed.arn }),
            )?;
        }
    }

    for (id, spec) in part.unmatched_desired {
        let arn = request(deployer, &spec, report).await?;
        let issued = wait_issued(deployer, &arn).await?;
        stack.set_status(
            &id,
            ResourceStatus::Certificate(CertificateStatus { arn: issued.arn }),
        )?;
    }

    Ok(pending_delete)
}

/// Deferred deletions: unmatched-actual certificates stay available to
/// listeners during the pass and die here, after the references are gone.
pub(crate) async fn post_synthesize(
    deployer: &StackDeployer<'_>,
    pending: Vec<ObservedCertificate>,
    report: &mut DeployReport,
) -> Result<()> {
    for cert in pending {
        delete_with_validation_records(deployer, &cert).await?;
        report.record(
            EventVerb::Delete,
            format!("deleted certificate {} ({})", cert.domain_name, cert.arn),
        );
    }
    Ok(())
}

async fn request(
    deployer: &StackDeployer<'_>,
    spec: &CertificateSpec,
    report: &mut DeployReport,
) -> Result<String> {
    let arn = match (spec.cert_type, spec.validation_method) {
        (CertificateType::AmazonIssued, ValidationMethod::Dns) => {
            create_with_validation_records(deployer, spec).await?
        }
        // Private and imported certificates are requested without DNS
        // publishing.
        _ => deployer
            .cloud
            .acm
            .request_certificate(spec, &spec.tags)
            .await?,
    };
    report.record(
        EventVerb::Create,
        format!("requested certificate for {}", spec.domain_name),
    );
    Ok(arn)
}

/// Requests the certificate, waits for ACM to expose the DNS validation
/// records it wants, and publishes each as a CNAME in the enclosing hosted
/// zone. A record another certificate already published counts as success.
async fn create_with_validation_records(
    deployer: &StackDeployer<'_>,
    spec: &CertificateSpec,
) -> Result<String> {
    let arn = deployer
        .cloud
        .acm
        .request_certificate(spec, &spec.tags)
        .await?;

    // ACM fills DomainValidationOptions asynchronously after the request.
    let expected = spec.san_set();
    let records = wait_for(
        deployer.config.record_poll,
        || async {
            let cert = deployer.cloud.acm.describe_certificate(&arn).await?;
            let covered = expected.iter().all(|domain| {
                cert.validation_records
                    .iter()
                    .any(|record| &record.domain_name == domain)
            });
            Ok(covered.then_some(cert.validation_records))
        },
        || Error::RequeueAfter(Duration::from_secs(15)),
    )
    .await?;

    for record in &records {
        publish_validation_record(deployer, record).await?;
    }
    Ok(arn)
}

async fn publish_validation_record(
    deployer: &StackDeployer<'_>,
    record: &ValidationRecord,
) -> Result<()> {
    let zone = deployer
        .cloud
        .dns
        .find_hosted_zone(&record.domain_name)
        .await?
        .ok_or_else(|| {
            Error::config(format!(
                "no public hosted zone encloses {}; cannot publish DNS validation",
                record.domain_name
            ))
        })?;

    match deployer
        .cloud
        .dns
        .upsert_record(
            &zone.id,
            &record.name,
            &record.record_type,
            &record.value,
            VALIDATION_RECORD_TTL,
        )
        .await
    {
        Ok(()) => Ok(()),
        // Another certificate for the same domain shares the validation
        // record.
        Err(err) if record_conflict(&err) => {
            tracing::debug!(record = %record.name, %err, "Validation record already present");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

async fn delete_with_validation_records(
    deployer: &StackDeployer<'_>,
    cert: &ObservedCertificate,
) -> Result<()> {
    for record in &cert.validation_records {
        let Some(zone) = deployer
            .cloud
            .dns
            .find_hosted_zone(&record.domain_name)
            .await?
        else {
            tracing::debug!(domain = %record.domain_name, "No hosted zone; skipping record cleanup");
            continue;
        };
        match deployer
            .cloud
            .dns
            .delete_record(
                &zone.id,
                &record.name,
                &record.record_type,
                &record.value,
                VALIDATION_RECORD_TTL,
            )
            .await
        {
            Ok(()) => {}
            // Gone already, or another certificate reuses the record and
            // its current values no longer match this delete.
            Err(err) if err.is_not_found() || record_conflict(&err) => {
                tracing::debug!(record = %record.name, %err, "Skipping validation record");
            }
            Err(err) => return Err(err),
        }
    }

    // A listener may still hold the certificate for a short window after
    // being repointed.
    let delete = retry_while(deployer.config.delete_poll, Error::is_in_use, || {
        deployer.cloud.acm.delete_certificate(&cert.arn)
    })
    .await;
    match delete {
        Ok(()) => Ok(()),
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(err),
    }
}

async fn wait_issued(
    deployer: &StackDeployer<'_>,
    arn: &str,
) -> Result<ObservedCertificate> {
    wait_for(
        PollSettings::new(
            deployer.config.issued_poll_interval,
            deployer.config.validate_wait,
        ),
        || async {
            let cert = deployer.cloud.acm.describe_certificate(arn).await?;
            match &cert.state {
                CertificateState::Issued => Ok(Some(cert)),
                CertificateState::PendingValidation => Ok(None),
                state => Err(Error::cloud(
                    "CertificateUnusable",
                    format!("certificate {arn} is {state:?}"),
                )),
            }
        },
        || Error::RequeueAfter(Duration::from_secs(60)),
    )
    .await
}

fn record_conflict(err: &Error) -> bool {
    matches!(err, Error::Cloud { code, .. } if code == "InvalidChangeBatch")
}
