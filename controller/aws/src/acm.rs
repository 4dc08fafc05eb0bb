use crate::cache::TtlCache;
use alb_controller_core::{
    cloud::CertificatesApi,
    model::certificate::{
        CertificateSpec, CertificateState, CertificateType, ObservedCertificate, ValidationMethod,
        ValidationRecord,
    },
    tags::TagFilter,
    Error, Result,
};
use aws_sdk_acm::{
    error::{ProvideErrorMetadata, SdkError},
    types as acm, Client,
};
use std::{collections::BTreeMap, time::Duration};

pub struct Acm {
    client: Client,
    /// ARN to tag set. ListTagsForCertificate is one call per certificate,
    /// so discovery over an account with many certificates would otherwise
    /// dominate the reconcile.
    tag_cache: TtlCache<String, BTreeMap<String, String>>,
}

impl Acm {
    pub fn new(config: &aws_config::SdkConfig, tag_ttl: Duration) -> Self {
        Self {
            client: Client::new(config),
            tag_cache: TtlCache::new(tag_ttl),
        }
    }

    async fn certificate_tags(&self, arn: &str) -> Result<BTreeMap<String, String>> {
        let listed = self
            .client
            .list_tags_for_certificate()
            .certificate_arn(arn)
            .send()
            .await
            .map_err(to_error)?;
        Ok(listed
            .tags()
            .iter()
            .filter_map(|t| Some((t.key().to_string(), t.value().unwrap_or("").to_string())))
            .collect())
    }
}

#[async_trait::async_trait]
impl CertificatesApi for Acm {
    async fn find_certificates(&self, filter: &TagFilter) -> Result<Vec<ObservedCertificate>> {
        let mut arns = Vec::new();
        let mut pages = self.client.list_certificates().into_paginator().items().send();
        while let Some(item) = pages.next().await {
            let summary = item.map_err(to_error)?;
            if let Some(arn) = summary.certificate_arn() {
                arns.push(arn.to_string());
            }
        }

        let (hits, misses) = self.tag_cache.collect(arns).await;
        let fetched = self
            .tag_cache
            .populate(misses, |keys| async move {
                let mut out = Vec::with_capacity(keys.len());
                for arn in keys {
                    let tags = self.certificate_tags(&arn).await?;
                    out.push((arn, tags));
                }
                Ok::<_, Error>(out)
            })
            .await?;

        let mut out = Vec::new();
        for (arn, tags) in hits.into_iter().chain(fetched) {
            if filter.matches(&tags) {
                out.push(self.describe_certificate(&arn).await?);
            }
        }
        Ok(out)
    }

    async fn describe_certificate(&self, arn: &str) -> Result<ObservedCertificate> {
        let described = self
            .client
            .describe_certificate()
            .certificate_arn(arn)
            .send()
            .await
            .map_err(to_error)?;
        let detail = described
            .certificate()
            .ok_or_else(|| Error::cloud("Unknown", "DescribeCertificate returned no detail"))?;
        let tags = self.certificate_tags(arn).await?;
        Ok(observed_certificate(detail, tags))
    }

    async fn request_certificate(
        &self,
        spec: &CertificateSpec,
        tags: &BTreeMap<String, String>,
    ) -> Result<String> {
        if spec.cert_type == CertificateType::Imported {
            return Err(Error::config(
                "imported certificates must be provisioned out of band and referenced by ARN",
            ));
        }

        let sdk_tags = tags
            .iter()
            .map(|(key, value)| {
                acm::Tag::builder()
                    .key(key)
                    .value(value)
                    .build()
                    .map_err(|err| Error::fatal(format!("invalid tag: {err}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut request = self
            .client
            .request_certificate()
            .domain_name(&spec.domain_name)
            .validation_method(match spec.validation_method {
                ValidationMethod::Dns => acm::ValidationMethod::Dns,
                ValidationMethod::Email => acm::ValidationMethod::Email,
            })
            .set_tags(Some(sdk_tags));
        let sans: Vec<String> = spec
            .subject_alternative_names
            .iter()
            .filter(|san| **san != spec.domain_name)
            .cloned()
            .collect();
        if !sans.is_empty() {
            request = request.set_subject_alternative_names(Some(sans));
        }
        if let Some(algorithm) = &spec.key_algorithm {
            request = request.key_algorithm(acm::KeyAlgorithm::from(algorithm.as_str()));
        }
        if let Some(ca_arn) = &spec.certificate_authority_arn {
            request = request.certificate_authority_arn(ca_arn);
        }

        let requested = request.send().await.map_err(to_error)?;
        requested
            .certificate_arn()
            .map(str::to_string)
            .ok_or_else(|| Error::cloud("Unknown", "RequestCertificate returned no ARN"))
    }

    async fn delete_certificate(&self, arn: &str) -> Result<()> {
        self.client
            .delete_certificate()
            .certificate_arn(arn)
            .send()
            .await
            .map_err(to_error)?;
        self.tag_cache.invalidate(&arn.to_string()).await;
        Ok(())
    }
}

fn to_error<E, R>(err: SdkError<E, R>) -> Error
where
    SdkError<E, R>: ProvideErrorMetadata,
{
    let code = ProvideErrorMetadata::code(&err)
        .unwrap_or("Unknown")
        .to_string();
    let message = ProvideErrorMetadata::message(&err)
        .unwrap_or("request failed")
        .to_string();
    Error::cloud(code, message)
}

fn observed_certificate(
    detail: &acm::CertificateDetail,
    tags: BTreeMap<String, String>,
) -> ObservedCertificate {
    let validation_records = detail
        .domain_validation_options()
        .iter()
        .filter_map(|option| {
            let record = option.resource_record()?;
            Some(ValidationRecord {
                domain_name: option.domain_name().unwrap_or_default().to_string(),
                name: record.name().to_string(),
                record_type: record.r#type().as_str().to_string(),
                value: record.value().to_string(),
            })
        })
        .collect();

    ObservedCertificate {
        arn: detail.certificate_arn().unwrap_or_default().to_string(),
        domain_name: detail.domain_name().unwrap_or_default().to_string(),
        subject_alternative_names: detail
            .subject_alternative_names()
            .iter()
            .map(String::clone)
            .collect(),
        state: match detail.status() {
            Some(acm::CertificateStatus::PendingValidation) => CertificateState::PendingValidation,
            Some(acm::CertificateStatus::Issued) => CertificateState::Issued,
            Some(acm::CertificateStatus::Failed) => CertificateState::Failed,
            Some(other) => CertificateState::Other(other.as_str().to_string()),
            None => CertificateState::Other("UNKNOWN".to_string()),
        },
        created_at: detail
            .created_at()
            .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
        validation_records,
        tags,
    }
}
