use alb_controller_core::{
    cloud::{NetworkApi, SecurityGroupInput, SubnetInfo, SubnetSelector},
    model::security_group::{IngressRule, IngressSource, ObservedSecurityGroup, SgProtocol},
    tags::TagFilter,
    Error, Result,
};
use aws_sdk_ec2::{
    error::{ProvideErrorMetadata, SdkError},
    types as ec2, Client,
};
use std::collections::BTreeMap;

pub struct Ec2 {
    client: Client,
}

impl Ec2 {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait::async_trait]
impl NetworkApi for Ec2 {
    async fn describe_subnets(&self, selector: &SubnetSelector) -> Result<Vec<SubnetInfo>> {
        let mut request = self.client.describe_subnets();
        match selector {
            SubnetSelector::Ids(ids) => {
                request = request.set_subnet_ids(Some(ids.clone()));
            }
            SubnetSelector::NameTags(names) => {
                request = request.filters(
                    ec2::Filter::builder()
                        .name("tag:Name")
                        .set_values(Some(names.clone()))
                        .build(),
                );
            }
        }
        let described = request.send().await.map_err(to_error)?;
        Ok(described
            .subnets()
            .iter()
            .filter_map(|subnet| {
                Some(SubnetInfo {
                    subnet_id: subnet.subnet_id()?.to_string(),
                    availability_zone: subnet.availability_zone()?.to_string(),
                    vpc_id: subnet.vpc_id()?.to_string(),
                })
            })
            .collect())
    }

    async fn find_security_groups(
        &self,
        filter: &TagFilter,
    ) -> Result<Vec<ObservedSecurityGroup>> {
        let mut request = self.client.describe_security_groups();
        for (key, values) in filter.iter() {
            request = if values.is_empty() {
                request.filters(
                    ec2::Filter::builder()
                        .name("tag-key")
                        .values(key)
                        .build(),
                )
            } else {
                request.filters(
                    ec2::Filter::builder()
                        .name(format!("tag:{key}"))
                        .set_values(Some(values.clone()))
                        .build(),
                )
            };
        }
        let described = request.send().await.map_err(to_error)?;
        Ok(described
            .security_groups()
            .iter()
            .map(observed_security_group)
            .collect())
    }

    async fn describe_security_groups(
        &self,
        group_ids: &[String],
    ) -> Result<Vec<ObservedSecurityGroup>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let described = self
            .client
            .describe_security_groups()
            .set_group_ids(Some(group_ids.to_vec()))
            .send()
            .await
            .map_err(to_error)?;
        Ok(described
            .security_groups()
            .iter()
            .map(observed_security_group)
            .collect())
    }

    async fn create_security_group(&self, input: &SecurityGroupInput) -> Result<String> {
        let tags = input
            .tags
            .iter()
            .map(|(key, value)| ec2::Tag::builder().key(key).value(value).build())
            .collect();
        let created = self
            .client
            .create_security_group()
            .group_name(&input.name)
            .description(&input.description)
            .vpc_id(&input.vpc_id)
            .tag_specifications(
                ec2::TagSpecification::builder()
                    .resource_type(ec2::ResourceType::SecurityGroup)
                    .set_tags(Some(tags))
                    .build(),
            )
            .send()
            .await
            .map_err(to_error)?;
        let group_id = created
            .group_id()
            .ok_or_else(|| Error::cloud("Unknown", "CreateSecurityGroup returned no group id"))?
            .to_string();

        if !input.ingress_rules.is_empty() {
            self.authorize_ingress(&group_id, &input.ingress_rules).await?;
        }
        Ok(group_id)
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule<String>],
    ) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }
        self.client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(rules.iter().map(to_ip_permission).collect()))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn revoke_ingress(&self, group_id: &str, rules: &[IngressRule<String>]) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }
        self.client
            .revoke_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(rules.iter().map(to_ip_permission).collect()))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(to_error)?;
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
    // EC2 reports an attached security group as DependencyViolation rather
    // than ResourceInUse; fold it into the in-use retry path.
    let code = if code == "DependencyViolation" {
        "ResourceInUse".to_string()
    } else {
        code
    };
    let message = ProvideErrorMetadata::message(&err)
        .unwrap_or("request failed")
        .to_string();
    Error::cloud(code, message)
}

fn to_ip_permission(rule: &IngressRule<String>) -> ec2::IpPermission {
    let mut permission = ec2::IpPermission::builder()
        .ip_protocol(rule.protocol.as_str())
        .from_port(i32::from(rule.from_port))
        .to_port(i32::from(rule.to_port));
    match &rule.source {
        IngressSource::Cidr(net) => {
            permission = permission.ip_ranges(
                ec2::IpRange::builder()
                    .cidr_ip(net.to_string())
                    .set_description(rule.description.clone())
                    .build(),
            );
        }
        IngressSource::SecurityGroup(group_id) => {
            permission = permission.user_id_group_pairs(
                ec2::UserIdGroupPair::builder()
                    .group_id(group_id)
                    .set_description(rule.description.clone())
                    .build(),
            );
        }
    }
    permission.build()
}

fn observed_security_group(group: &ec2::SecurityGroup) -> ObservedSecurityGroup {
    let mut ingress_rules = Vec::new();
    for permission in group.ip_permissions() {
        let protocol = match permission.ip_protocol() {
            Some("tcp") => SgProtocol::Tcp,
            Some("udp") => SgProtocol::Udp,
            _ => SgProtocol::All,
        };
        let from_port = permission.from_port().unwrap_or_default() as u16;
        let to_port = permission.to_port().unwrap_or_default() as u16;
        for range in permission.ip_ranges() {
            let Some(cidr) = range.cidr_ip().and_then(|c| c.parse().ok()) else {
                continue;
            };
            ingress_rules.push(IngressRule {
                protocol,
                from_port,
                to_port,
                source: IngressSource::Cidr(cidr),
                description: range.description().map(str::to_string),
            });
        }
        for pair in permission.user_id_group_pairs() {
            let Some(source_group) = pair.group_id() else {
                continue;
            };
            ingress_rules.push(IngressRule {
                protocol,
                from_port,
                to_port,
                source: IngressSource::SecurityGroup(source_group.to_string()),
                description: pair.description().map(str::to_string),
            });
        }
    }

    let tags: BTreeMap<String, String> = group
        .tags()
        .iter()
        .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or("").to_string())))
        .collect();

    ObservedSecurityGroup {
        group_id: group.group_id().unwrap_or_default().to_string(),
        name: group.group_name().unwrap_or_default().to_string(),
        description: group.description().unwrap_or_default().to_string(),
        ingress_rules,
        tags,
    }
}
