use alb_controller_core::{
    cloud::{DnsApi, HostedZone},
    Error, Result,
};
use aws_sdk_route53::{
    error::{ProvideErrorMetadata, SdkError},
    types as r53, Client,
};

pub struct Route53 {
    client: Client,
}

impl Route53 {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    async fn change_record(
        &self,
        action: r53::ChangeAction,
        zone_id: &str,
        name: &str,
        record_type: &str,
        value: &str,
        ttl: i64,
    ) -> Result<()> {
        let invalid = |err| Error::fatal(format!("invalid record change: {err}"));
        let record_set = r53::ResourceRecordSet::builder()
            .name(name)
            .r#type(r53::RrType::from(record_type))
            .ttl(ttl)
            .resource_records(
                r53::ResourceRecord::builder()
                    .value(value)
                    .build()
                    .map_err(invalid)?,
            )
            .build()
            .map_err(invalid)?;
        let change = r53::Change::builder()
            .action(action)
            .resource_record_set(record_set)
            .build()
            .map_err(invalid)?;
        self.client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(
                r53::ChangeBatch::builder()
                    .changes(change)
                    .build()
                    .map_err(invalid)?,
            )
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DnsApi for Route53 {
    async fn find_hosted_zone(&self, domain: &str) -> Result<Option<HostedZone>> {
        let fqdn = to_fqdn(domain);

        let mut best: Option<HostedZone> = None;
        let mut pages = self.client.list_hosted_zones().into_paginator().items().send();
        while let Some(item) = pages.next().await {
            let zone = item.map_err(to_error)?;
            let private = zone
                .config()
                .map(|c| c.private_zone())
                .unwrap_or_default();
            if private {
                continue;
            }
            let name = to_fqdn(zone.name());
            if !is_suffix(&fqdn, &name) {
                continue;
            }
            if best.as_ref().map(|b| name.len() > b.name.len()).unwrap_or(true) {
                best = Some(HostedZone {
                    id: zone.id().trim_start_matches("/hostedzone/").to_string(),
                    name,
                    private,
                });
            }
        }
        Ok(best)
    }

    async fn upsert_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
        value: &str,
        ttl: i64,
    ) -> Result<()> {
        self.change_record(r53::ChangeAction::Upsert, zone_id, name, record_type, value, ttl)
            .await
    }

    async fn delete_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
        value: &str,
        ttl: i64,
    ) -> Result<()> {
        self.change_record(r53::ChangeAction::Delete, zone_id, name, record_type, value, ttl)
            .await
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

fn to_fqdn(domain: &str) -> String {
    let mut fqdn = domain.trim_end_matches('.').to_ascii_lowercase();
    fqdn.push('.');
    fqdn
}

/// `zone` encloses `domain`: equal, or a parent (`example.com.` encloses
/// `api.example.com.` but not `notexample.com.`).
fn is_suffix(domain: &str, zone: &str) -> bool {
    domain == zone || domain.ends_with(&format!(".{zone}"))
}

#[cfg(test)]
mod tests {
    use super::{is_suffix, to_fqdn};

    #[test]
    fn fqdn_normalization() {
        assert_eq!(to_fqdn("Example.com"), "example.com.");
        assert_eq!(to_fqdn("example.com."), "example.com.");
    }

    #[test]
    fn suffix_match_requires_a_label_boundary() {
        assert!(is_suffix("api.example.com.", "example.com."));
        assert!(is_suffix("example.com.", "example.com."));
        assert!(!is_suffix("notexample.com.", "example.com."));
        assert!(!is_suffix("example.com.", "api.example.com."));
    }
}
