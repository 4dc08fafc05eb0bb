use alb_controller_core::{
    cloud::{
        ListenerInput, LoadBalancerInput, LoadBalancingApi, RuleInput, TargetDescription,
        TargetGroupInput, TargetHealth, TargetState,
    },
    model::{
        listener::{
            Action, AuthBehavior, AuthenticateCognitoConfig, AuthenticateOidcConfig,
            FixedResponseConfig, ForwardConfig, ObservedListener, ObservedRule, QueryStringPair,
            RedirectConfig, RedirectStatusCode, RuleCondition, TargetGroupTuple,
        },
        load_balancer::{
            IpAddressType, LoadBalancerState, LoadBalancerType, ObservedLoadBalancer, Scheme,
            SubnetMapping,
        },
        target_group::{
            HealthCheck, HealthCheckPort, Matcher, ObservedTargetGroup, Protocol, ProtocolVersion,
            TargetType,
        },
    },
    tags::TagFilter,
    Error, Result,
};
use aws_sdk_elasticloadbalancingv2::{
    error::{ProvideErrorMetadata, SdkError},
    types as elb, Client,
};
use std::collections::BTreeMap;

/// DescribeTags accepts at most twenty resource ARNs per call.
const DESCRIBE_TAGS_CHUNK: usize = 20;

pub struct Elbv2 {
    client: Client,
}

impl Elbv2 {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    /// Tags for each ARN, fetched in DescribeTags-sized chunks.
    async fn tags_for(&self, arns: &[String]) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
        let mut out = BTreeMap::new();
        for chunk in arns.chunks(DESCRIBE_TAGS_CHUNK) {
            let described = self
                .client
                .describe_tags()
                .set_resource_arns(Some(chunk.to_vec()))
                .send()
                .await
                .map_err(to_error)?;
            for description in described.tag_descriptions() {
                let Some(arn) = description.resource_arn() else {
                    continue;
                };
                let tags = description
                    .tags()
                    .iter()
                    .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or("").to_string())))
                    .collect();
                out.insert(arn.to_string(), tags);
            }
        }
        Ok(out)
    }

    async fn load_balancer_attributes(&self, arn: &str) -> Result<BTreeMap<String, String>> {
        let described = self
            .client
            .describe_load_balancer_attributes()
            .load_balancer_arn(arn)
            .send()
            .await
            .map_err(to_error)?;
        Ok(described
            .attributes()
            .iter()
            .filter_map(|a| Some((a.key()?.to_string(), a.value()?.to_string())))
            .collect())
    }

    async fn target_group_attributes(&self, arn: &str) -> Result<BTreeMap<String, String>> {
        let described = self
            .client
            .describe_target_group_attributes()
            .target_group_arn(arn)
            .send()
            .await
            .map_err(to_error)?;
        Ok(described
            .attributes()
            .iter()
            .filter_map(|a| Some((a.key()?.to_string(), a.value()?.to_string())))
            .collect())
    }

    async fn listener_certificates(&self, listener_arn: &str) -> Result<Vec<String>> {
        let described = self
            .client
            .describe_listener_certificates()
            .listener_arn(listener_arn)
            .send()
            .await
            .map_err(to_error)?;
        let mut arns: Vec<String> = described
            .certificates()
            .iter()
            .filter_map(|c| c.certificate_arn().map(str::to_string))
            .collect();
        arns.sort();
        arns.dedup();
        Ok(arns)
    }

    /// Reconciles the non-default certificate set on a listener.
    async fn sync_extra_certificates(&self, arn: &str, desired: &[String]) -> Result<()> {
        let current = self.listener_certificates(arn).await?;
        for cert in desired.iter().filter(|c| !current.contains(c)) {
            self.client
                .add_listener_certificates()
                .listener_arn(arn)
                .certificates(elb::Certificate::builder().certificate_arn(cert).build())
                .send()
                .await
                .map_err(to_error)?;
        }
        for cert in current.iter().filter(|c| !desired.contains(c)) {
            self.client
                .remove_listener_certificates()
                .listener_arn(arn)
                .certificates(elb::Certificate::builder().certificate_arn(cert).build())
                .send()
                .await
                .map_err(to_error)?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LoadBalancingApi for Elbv2 {
    async fn find_load_balancers(&self, filter: &TagFilter) -> Result<Vec<ObservedLoadBalancer>> {
        let mut raw = Vec::new();
        let mut pages = self
            .client
            .describe_load_balancers()
            .into_paginator()
            .items()
            .send();
        while let Some(item) = pages.next().await {
            raw.push(item.map_err(to_error)?);
        }

        let arns: Vec<String> = raw
            .iter()
            .filter_map(|lb| lb.load_balancer_arn().map(str::to_string))
            .collect();
        let tags_by_arn = self.tags_for(&arns).await?;

        let mut out = Vec::new();
        for lb in raw {
            let Some(arn) = lb.load_balancer_arn().map(str::to_string) else {
                continue;
            };
            let tags = tags_by_arn.get(&arn).cloned().unwrap_or_default();
            if !filter.matches(&tags) {
                continue;
            }
            let attributes = self.load_balancer_attributes(&arn).await?;
            out.push(observed_load_balancer(&lb, tags, attributes)?);
        }
        Ok(out)
    }

    async fn create_load_balancer(
        &self,
        input: &LoadBalancerInput,
    ) -> Result<ObservedLoadBalancer> {
        let created = self
            .client
            .create_load_balancer()
            .name(&input.name)
            .r#type(elb::LoadBalancerTypeEnum::from(input.lb_type.as_str()))
            .scheme(elb::LoadBalancerSchemeEnum::from(input.scheme.as_str()))
            .ip_address_type(elb::IpAddressType::from(input.ip_address_type.as_str()))
            .set_subnet_mappings(Some(
                input.subnet_mappings.iter().map(to_sdk_subnet_mapping).collect(),
            ))
            .set_security_groups(Some(input.security_groups.clone()))
            .set_tags(Some(to_sdk_tags(&input.tags)?))
            .send()
            .await
            .map_err(to_error)?;

        let lb = created
            .load_balancers()
            .first()
            .ok_or_else(|| Error::cloud("Unknown", "CreateLoadBalancer returned no load balancer"))?;
        if !input.attributes.is_empty() {
            let arn = lb.load_balancer_arn().unwrap_or_default().to_string();
            self.modify_load_balancer_attributes(&arn, &input.attributes)
                .await?;
        }
        observed_load_balancer(lb, input.tags.clone(), input.attributes.clone())
    }

    async fn set_security_groups(&self, arn: &str, security_groups: &[String]) -> Result<()> {
        self.client
            .set_security_groups()
            .load_balancer_arn(arn)
            .set_security_groups(Some(security_groups.to_vec()))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn set_subnets(&self, arn: &str, subnet_mappings: &[SubnetMapping]) -> Result<()> {
        self.client
            .set_subnets()
            .load_balancer_arn(arn)
            .set_subnet_mappings(Some(
                subnet_mappings.iter().map(to_sdk_subnet_mapping).collect(),
            ))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn set_ip_address_type(&self, arn: &str, ip_address_type: IpAddressType) -> Result<()> {
        self.client
            .set_ip_address_type()
            .load_balancer_arn(arn)
            .ip_address_type(elb::IpAddressType::from(ip_address_type.as_str()))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn modify_load_balancer_attributes(
        &self,
        arn: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let attributes = attributes
            .iter()
            .map(|(key, value)| {
                elb::LoadBalancerAttribute::builder()
                    .key(key)
                    .value(value)
                    .build()
            })
            .collect();
        self.client
            .modify_load_balancer_attributes()
            .load_balancer_arn(arn)
            .set_attributes(Some(attributes))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn delete_load_balancer(&self, arn: &str) -> Result<()> {
        self.client
            .delete_load_balancer()
            .load_balancer_arn(arn)
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn find_target_groups(&self, filter: &TagFilter) -> Result<Vec<ObservedTargetGroup>> {
        let mut raw = Vec::new();
        let mut pages = self
            .client
            .describe_target_groups()
            .into_paginator()
            .items()
            .send();
        while let Some(item) = pages.next().await {
            raw.push(item.map_err(to_error)?);
        }

        let arns: Vec<String> = raw
            .iter()
            .filter_map(|tg| tg.target_group_arn().map(str::to_string))
            .collect();
        let tags_by_arn = self.tags_for(&arns).await?;

        let mut out = Vec::new();
        for tg in raw {
            let Some(arn) = tg.target_group_arn().map(str::to_string) else {
                continue;
            };
            let tags = tags_by_arn.get(&arn).cloned().unwrap_or_default();
            if !filter.matches(&tags) {
                continue;
            }
            let attributes = self.target_group_attributes(&arn).await?;
            out.push(observed_target_group(&tg, tags, attributes)?);
        }
        Ok(out)
    }

    async fn create_target_group(&self, input: &TargetGroupInput) -> Result<ObservedTargetGroup> {
        let mut request = self
            .client
            .create_target_group()
            .name(&input.name)
            .protocol(elb::ProtocolEnum::from(input.protocol.as_str()))
            .port(i32::from(input.port))
            .target_type(elb::TargetTypeEnum::from(input.target_type.as_str()))
            .health_check_protocol(elb::ProtocolEnum::from(input.health_check.protocol.as_str()))
            .health_check_port(input.health_check.port.to_string())
            .health_check_interval_seconds(i32::from(input.health_check.interval_seconds))
            .health_check_timeout_seconds(i32::from(input.health_check.timeout_seconds))
            .healthy_threshold_count(i32::from(input.health_check.healthy_threshold))
            .unhealthy_threshold_count(i32::from(input.health_check.unhealthy_threshold))
            .set_health_check_path(input.health_check.path.clone())
            .set_tags(Some(to_sdk_tags(&input.tags)?));
        if let Some(version) = input.protocol_version {
            request = request.protocol_version(version.as_str());
        }
        if let Some(matcher) = &input.matcher {
            request = request.matcher(elb::Matcher::builder().http_code(&matcher.http_code).build());
        }

        let created = request.send().await.map_err(to_error)?;
        let tg = created
            .target_groups()
            .first()
            .ok_or_else(|| Error::cloud("Unknown", "CreateTargetGroup returned no target group"))?;
        if !input.attributes.is_empty() {
            let arn = tg.target_group_arn().unwrap_or_default().to_string();
            self.modify_target_group_attributes(&arn, &input.attributes)
                .await?;
        }
        observed_target_group(tg, input.tags.clone(), input.attributes.clone())
    }

    async fn modify_target_group(
        &self,
        arn: &str,
        health_check: &HealthCheck,
        matcher: Option<&Matcher>,
    ) -> Result<()> {
        let mut request = self
            .client
            .modify_target_group()
            .target_group_arn(arn)
            .health_check_protocol(elb::ProtocolEnum::from(health_check.protocol.as_str()))
            .health_check_port(health_check.port.to_string())
            .health_check_interval_seconds(i32::from(health_check.interval_seconds))
            .health_check_timeout_seconds(i32::from(health_check.timeout_seconds))
            .healthy_threshold_count(i32::from(health_check.healthy_threshold))
            .unhealthy_threshold_count(i32::from(health_check.unhealthy_threshold))
            .set_health_check_path(health_check.path.clone());
        if let Some(matcher) = matcher {
            request = request.matcher(elb::Matcher::builder().http_code(&matcher.http_code).build());
        }
        request.send().await.map_err(to_error)?;
        Ok(())
    }

    async fn modify_target_group_attributes(
        &self,
        arn: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let attributes = attributes
            .iter()
            .map(|(key, value)| {
                elb::TargetGroupAttribute::builder()
                    .key(key)
                    .value(value)
                    .build()
            })
            .collect();
        self.client
            .modify_target_group_attributes()
            .target_group_arn(arn)
            .set_attributes(Some(attributes))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn delete_target_group(&self, arn: &str) -> Result<()> {
        self.client
            .delete_target_group()
            .target_group_arn(arn)
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn register_targets(&self, arn: &str, targets: &[TargetDescription]) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        self.client
            .register_targets()
            .target_group_arn(arn)
            .set_targets(Some(to_sdk_targets(targets)?))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn deregister_targets(&self, arn: &str, targets: &[TargetDescription]) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        self.client
            .deregister_targets()
            .target_group_arn(arn)
            .set_targets(Some(to_sdk_targets(targets)?))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn list_targets(&self, arn: &str) -> Result<Vec<TargetHealth>> {
        let described = self
            .client
            .describe_target_health()
            .target_group_arn(arn)
            .send()
            .await
            .map_err(to_error)?;
        Ok(described
            .target_health_descriptions()
            .iter()
            .filter_map(|d| {
                let target = d.target()?;
                Some(TargetHealth {
                    target: TargetDescription {
                        id: target.id().unwrap_or_default().to_string(),
                        port: target.port().unwrap_or_default() as u16,
                    },
                    state: d
                        .target_health()
                        .and_then(|h| h.state())
                        .map(from_sdk_target_state)
                        .unwrap_or(TargetState::Unused),
                })
            })
            .collect())
    }

    async fn describe_listeners(&self, load_balancer_arn: &str) -> Result<Vec<ObservedListener>> {
        let mut raw = Vec::new();
        let mut pages = self
            .client
            .describe_listeners()
            .load_balancer_arn(load_balancer_arn)
            .into_paginator()
            .items()
            .send();
        while let Some(item) = pages.next().await {
            raw.push(item.map_err(to_error)?);
        }

        let mut out = Vec::new();
        for listener in raw {
            let Some(arn) = listener.listener_arn().map(str::to_string) else {
                continue;
            };
            let certificates = if listener.certificates().is_empty() {
                Vec::new()
            } else {
                self.listener_certificates(&arn).await?
            };
            out.push(observed_listener(&listener, certificates)?);
        }
        Ok(out)
    }

    async fn create_listener(&self, input: &ListenerInput) -> Result<ObservedListener> {
        let (default_certificate, extra_certificates) = split_certificates(&input.certificates);
        let mut request = self
            .client
            .create_listener()
            .load_balancer_arn(&input.load_balancer_arn)
            .port(i32::from(input.port))
            .protocol(elb::ProtocolEnum::from(input.protocol.as_str()))
            .set_default_actions(Some(to_sdk_actions(&input.default_actions)?))
            .set_ssl_policy(input.ssl_policy.clone())
            .set_tags(Some(to_sdk_tags(&input.tags)?));
        if let Some(cert) = &default_certificate {
            request =
                request.certificates(elb::Certificate::builder().certificate_arn(cert).build());
        }
        if let Some(alpn) = &input.alpn_policy {
            request = request.alpn_policy(alpn);
        }

        let created = request.send().await.map_err(to_error)?;
        let listener = created
            .listeners()
            .first()
            .ok_or_else(|| Error::cloud("Unknown", "CreateListener returned no listener"))?;
        let arn = listener.listener_arn().unwrap_or_default().to_string();
        if !extra_certificates.is_empty() {
            self.sync_extra_certificates(&arn, &input.certificates).await?;
        }
        observed_listener(listener, input.certificates.clone())
    }

    async fn modify_listener(&self, arn: &str, input: &ListenerInput) -> Result<()> {
        let (default_certificate, _) = split_certificates(&input.certificates);
        let mut request = self
            .client
            .modify_listener()
            .listener_arn(arn)
            .port(i32::from(input.port))
            .protocol(elb::ProtocolEnum::from(input.protocol.as_str()))
            .set_default_actions(Some(to_sdk_actions(&input.default_actions)?))
            .set_ssl_policy(input.ssl_policy.clone());
        if let Some(cert) = &default_certificate {
            request =
                request.certificates(elb::Certificate::builder().certificate_arn(cert).build());
        }
        if let Some(alpn) = &input.alpn_policy {
            request = request.alpn_policy(alpn);
        }
        request.send().await.map_err(to_error)?;

        if !input.certificates.is_empty() {
            self.sync_extra_certificates(arn, &input.certificates).await?;
        }
        Ok(())
    }

    async fn delete_listener(&self, arn: &str) -> Result<()> {
        self.client
            .delete_listener()
            .listener_arn(arn)
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<ObservedRule>> {
        let described = self
            .client
            .describe_rules()
            .listener_arn(listener_arn)
            .send()
            .await
            .map_err(to_error)?;
        described.rules().iter().map(observed_rule).collect()
    }

    async fn create_rule(&self, input: &RuleInput) -> Result<ObservedRule> {
        let mut request = self
            .client
            .create_rule()
            .listener_arn(&input.listener_arn)
            .priority(input.priority as i32)
            .set_conditions(Some(to_sdk_conditions(&input.conditions)))
            .set_actions(Some(to_sdk_actions(&input.actions)?));
        if !input.tags.is_empty() {
            request = request.set_tags(Some(to_sdk_tags(&input.tags)?));
        }
        let created = request.send().await.map_err(to_error)?;
        let rule = created
            .rules()
            .first()
            .ok_or_else(|| Error::cloud("Unknown", "CreateRule returned no rule"))?;
        observed_rule(rule)
    }

    async fn modify_rule(
        &self,
        arn: &str,
        conditions: &[RuleCondition],
        actions: &[Action<String>],
    ) -> Result<()> {
        self.client
            .modify_rule()
            .rule_arn(arn)
            .set_conditions(Some(to_sdk_conditions(conditions)))
            .set_actions(Some(to_sdk_actions(actions)?))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn delete_rule(&self, arn: &str) -> Result<()> {
        self.client
            .delete_rule()
            .rule_arn(arn)
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn add_tags(&self, arn: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        self.client
            .add_tags()
            .resource_arns(arn)
            .set_tags(Some(to_sdk_tags(tags)?))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.client
            .remove_tags()
            .resource_arns(arn)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(to_error)?;
        Ok(())
    }
}

pub(crate) fn to_error<E, R>(err: SdkError<E, R>) -> Error
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

/// The first certificate is the listener default; the rest ride along as
/// additional SNI certificates.
fn split_certificates(certificates: &[String]) -> (Option<String>, Vec<String>) {
    let mut iter = certificates.iter();
    let default = iter.next().cloned();
    (default, iter.cloned().collect())
}

fn to_sdk_tags(tags: &BTreeMap<String, String>) -> Result<Vec<elb::Tag>> {
    tags.iter()
        .map(|(key, value)| {
            elb::Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(|err| Error::fatal(format!("invalid tag: {err}")))
        })
        .collect()
}

fn to_sdk_targets(targets: &[TargetDescription]) -> Result<Vec<elb::TargetDescription>> {
    targets
        .iter()
        .map(|t| {
            elb::TargetDescription::builder()
                .id(&t.id)
                .port(i32::from(t.port))
                .build()
                .map_err(|err| Error::fatal(format!("invalid target: {err}")))
        })
        .collect()
}

fn to_sdk_subnet_mapping(mapping: &SubnetMapping) -> elb::SubnetMapping {
    elb::SubnetMapping::builder()
        .subnet_id(&mapping.subnet_id)
        .set_allocation_id(mapping.allocation_id.clone())
        .set_private_ipv4_address(mapping.private_ipv4_address.clone())
        .build()
}

fn to_sdk_actions(actions: &[Action<String>]) -> Result<Vec<elb::Action>> {
    actions.iter().map(to_sdk_action).collect()
}

fn to_sdk_action(action: &Action<String>) -> Result<elb::Action> {
    let invalid = |err| Error::fatal(format!("invalid action: {err}"));
    match action {
        Action::Forward(forward) => {
            let tuples = forward
                .target_groups
                .iter()
                .map(|t| {
                    elb::TargetGroupTuple::builder()
                        .target_group_arn(&t.target_group)
                        .set_weight(t.weight.map(|w| w as i32))
                        .build()
                })
                .collect();
            elb::Action::builder()
                .r#type(elb::ActionTypeEnum::Forward)
                .forward_config(
                    elb::ForwardActionConfig::builder()
                        .set_target_groups(Some(tuples))
                        .build(),
                )
                .build()
                .map_err(invalid)
        }
        Action::Redirect(redirect) => elb::Action::builder()
            .r#type(elb::ActionTypeEnum::Redirect)
            .redirect_config(
                elb::RedirectActionConfig::builder()
                    .set_protocol(redirect.protocol.clone())
                    .set_host(redirect.host.clone())
                    .set_port(redirect.port.clone())
                    .set_path(redirect.path.clone())
                    .set_query(redirect.query.clone())
                    .status_code(elb::RedirectActionStatusCodeEnum::from(
                        redirect.status_code.as_str(),
                    ))
                    .build()
                    .map_err(invalid)?,
            )
            .build()
            .map_err(invalid),
        Action::FixedResponse(fixed) => elb::Action::builder()
            .r#type(elb::ActionTypeEnum::FixedResponse)
            .fixed_response_config(
                elb::FixedResponseActionConfig::builder()
                    .status_code(fixed.status_code.to_string())
                    .set_content_type(fixed.content_type.clone())
                    .set_message_body(fixed.message_body.clone())
                    .build()
                    .map_err(invalid)?,
            )
            .build()
            .map_err(invalid),
        Action::AuthenticateOidc(oidc) => elb::Action::builder()
            .r#type(elb::ActionTypeEnum::AuthenticateOidc)
            .authenticate_oidc_config(
                elb::AuthenticateOidcActionConfig::builder()
                    .issuer(&oidc.issuer)
                    .authorization_endpoint(&oidc.authorization_endpoint)
                    .token_endpoint(&oidc.token_endpoint)
                    .user_info_endpoint(&oidc.user_info_endpoint)
                    .client_id(&oidc.client_id)
                    .set_client_secret(oidc.client_secret.clone())
                    .set_scope(oidc.scope.clone())
                    .set_session_cookie_name(oidc.session_cookie_name.clone())
                    .set_session_timeout(oidc.session_timeout_seconds.map(|t| t as i64))
                    .on_unauthenticated_request(
                        elb::AuthenticateOidcActionConditionalBehaviorEnum::from(
                            auth_behavior_str(oidc.on_unauthenticated_request),
                        ),
                    )
                    .build()
                    .map_err(invalid)?,
            )
            .build()
            .map_err(invalid),
        Action::AuthenticateCognito(cognito) => elb::Action::builder()
            .r#type(elb::ActionTypeEnum::AuthenticateCognito)
            .authenticate_cognito_config(
                elb::AuthenticateCognitoActionConfig::builder()
                    .user_pool_arn(&cognito.user_pool_arn)
                    .user_pool_client_id(&cognito.user_pool_client_id)
                    .user_pool_domain(&cognito.user_pool_domain)
                    .set_scope(cognito.scope.clone())
                    .set_session_cookie_name(cognito.session_cookie_name.clone())
                    .set_session_timeout(cognito.session_timeout_seconds.map(|t| t as i64))
                    .on_unauthenticated_request(
                        elb::AuthenticateCognitoActionConditionalBehaviorEnum::from(
                            auth_behavior_str(cognito.on_unauthenticated_request),
                        ),
                    )
                    .build()
                    .map_err(invalid)?,
            )
            .build()
            .map_err(invalid),
    }
}

fn auth_behavior_str(behavior: AuthBehavior) -> &'static str {
    match behavior {
        AuthBehavior::Deny => "deny",
        AuthBehavior::Allow => "allow",
        AuthBehavior::Authenticate => "authenticate",
    }
}

fn from_sdk_action(action: &elb::Action) -> Result<Action<String>> {
    match action.r#type() {
        elb::ActionTypeEnum::Forward => {
            let target_groups = match action.forward_config() {
                Some(config) => config
                    .target_groups()
                    .iter()
                    .map(|t| TargetGroupTuple {
                        target_group: t.target_group_arn().unwrap_or_default().to_string(),
                        weight: t.weight().map(|w| w as u32),
                    })
                    .collect(),
                None => vec![TargetGroupTuple {
                    target_group: action.target_group_arn().unwrap_or_default().to_string(),
                    weight: None,
                }],
            };
            Ok(Action::Forward(ForwardConfig { target_groups }))
        }
        elb::ActionTypeEnum::Redirect => {
            let config = action
                .redirect_config()
                .ok_or_else(|| Error::cloud("Unknown", "redirect action without config"))?;
            Ok(Action::Redirect(RedirectConfig {
                protocol: config.protocol().map(str::to_string),
                host: config.host().map(str::to_string),
                port: config.port().map(str::to_string),
                path: config.path().map(str::to_string),
                query: config.query().map(str::to_string),
                status_code: match config.status_code() {
                    Some(elb::RedirectActionStatusCodeEnum::Http302) => RedirectStatusCode::Http302,
                    _ => RedirectStatusCode::Http301,
                },
            }))
        }
        elb::ActionTypeEnum::FixedResponse => {
            let config = action
                .fixed_response_config()
                .ok_or_else(|| Error::cloud("Unknown", "fixed-response action without config"))?;
            Ok(Action::FixedResponse(FixedResponseConfig {
                status_code: config
                    .status_code()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(503),
                content_type: config.content_type().map(str::to_string),
                message_body: config.message_body().map(str::to_string),
            }))
        }
        elb::ActionTypeEnum::AuthenticateOidc => {
            let config = action
                .authenticate_oidc_config()
                .ok_or_else(|| Error::cloud("Unknown", "authenticate-oidc action without config"))?;
            Ok(Action::AuthenticateOidc(AuthenticateOidcConfig {
                issuer: config.issuer().unwrap_or_default().to_string(),
                authorization_endpoint: config
                    .authorization_endpoint()
                    .unwrap_or_default()
                    .to_string(),
                token_endpoint: config.token_endpoint().unwrap_or_default().to_string(),
                user_info_endpoint: config.user_info_endpoint().unwrap_or_default().to_string(),
                client_id: config.client_id().unwrap_or_default().to_string(),
                client_secret: config.client_secret().map(str::to_string),
                scope: config.scope().map(str::to_string),
                session_cookie_name: config.session_cookie_name().map(str::to_string),
                session_timeout_seconds: config.session_timeout().map(|t| t as u64),
                on_unauthenticated_request: config
                    .on_unauthenticated_request()
                    .map(|b| from_auth_behavior_str(b.as_str()))
                    .unwrap_or(AuthBehavior::Authenticate),
            }))
        }
        elb::ActionTypeEnum::AuthenticateCognito => {
            let config = action.authenticate_cognito_config().ok_or_else(|| {
                Error::cloud("Unknown", "authenticate-cognito action without config")
            })?;
            Ok(Action::AuthenticateCognito(AuthenticateCognitoConfig {
                user_pool_arn: config.user_pool_arn().unwrap_or_default().to_string(),
                user_pool_client_id: config.user_pool_client_id().unwrap_or_default().to_string(),
                user_pool_domain: config.user_pool_domain().unwrap_or_default().to_string(),
                scope: config.scope().map(str::to_string),
                session_cookie_name: config.session_cookie_name().map(str::to_string),
                session_timeout_seconds: config.session_timeout().map(|t| t as u64),
                on_unauthenticated_request: config
                    .on_unauthenticated_request()
                    .map(|b| from_auth_behavior_str(b.as_str()))
                    .unwrap_or(AuthBehavior::Authenticate),
            }))
        }
        other => Err(Error::cloud(
            "Unknown",
            format!("unsupported action type {other:?}"),
        )),
    }
}

fn from_auth_behavior_str(s: &str) -> AuthBehavior {
    match s {
        "deny" => AuthBehavior::Deny,
        "allow" => AuthBehavior::Allow,
        _ => AuthBehavior::Authenticate,
    }
}

fn to_sdk_conditions(conditions: &[RuleCondition]) -> Vec<elb::RuleCondition> {
    conditions
        .iter()
        .map(|condition| match condition {
            RuleCondition::HostHeader { values } => elb::RuleCondition::builder()
                .field("host-header")
                .host_header_config(
                    elb::HostHeaderConditionConfig::builder()
                        .set_values(Some(values.clone()))
                        .build(),
                )
                .build(),
            RuleCondition::PathPattern { values } => elb::RuleCondition::builder()
                .field("path-pattern")
                .path_pattern_config(
                    elb::PathPatternConditionConfig::builder()
                        .set_values(Some(values.clone()))
                        .build(),
                )
                .build(),
            RuleCondition::HttpHeader { name, values } => elb::RuleCondition::builder()
                .field("http-header")
                .http_header_config(
                    elb::HttpHeaderConditionConfig::builder()
                        .http_header_name(name)
                        .set_values(Some(values.clone()))
                        .build(),
                )
                .build(),
            RuleCondition::HttpRequestMethod { values } => elb::RuleCondition::builder()
                .field("http-request-method")
                .http_request_method_config(
                    elb::HttpRequestMethodConditionConfig::builder()
                        .set_values(Some(values.clone()))
                        .build(),
                )
                .build(),
            RuleCondition::QueryString { pairs } => elb::RuleCondition::builder()
                .field("query-string")
                .query_string_config(
                    elb::QueryStringConditionConfig::builder()
                        .set_values(Some(
                            pairs
                                .iter()
                                .map(|p| {
                                    elb::QueryStringKeyValuePair::builder()
                                        .set_key(p.key.clone())
                                        .value(&p.value)
                                        .build()
                                })
                                .collect(),
                        ))
                        .build(),
                )
                .build(),
            RuleCondition::SourceIp { values } => elb::RuleCondition::builder()
                .field("source-ip")
                .source_ip_config(
                    elb::SourceIpConditionConfig::builder()
                        .set_values(Some(values.iter().map(|n| n.to_string()).collect()))
                        .build(),
                )
                .build(),
        })
        .collect()
}

fn from_sdk_condition(condition: &elb::RuleCondition) -> Option<RuleCondition> {
    match condition.field() {
        Some("host-header") => Some(RuleCondition::HostHeader {
            values: condition
                .host_header_config()
                .map(|c| c.values().to_vec())
                .unwrap_or_default(),
        }),
        Some("path-pattern") => Some(RuleCondition::PathPattern {
            values: condition
                .path_pattern_config()
                .map(|c| c.values().to_vec())
                .unwrap_or_default(),
        }),
        Some("http-header") => condition.http_header_config().map(|c| RuleCondition::HttpHeader {
            name: c.http_header_name().unwrap_or_default().to_string(),
            values: c.values().to_vec(),
        }),
        Some("http-request-method") => Some(RuleCondition::HttpRequestMethod {
            values: condition
                .http_request_method_config()
                .map(|c| c.values().to_vec())
                .unwrap_or_default(),
        }),
        Some("query-string") => condition.query_string_config().map(|c| {
            RuleCondition::QueryString {
                pairs: c
                    .values()
                    .iter()
                    .map(|p| QueryStringPair {
                        key: p.key().map(str::to_string),
                        value: p.value().unwrap_or_default().to_string(),
                    })
                    .collect(),
            }
        }),
        Some("source-ip") => Some(RuleCondition::SourceIp {
            values: condition
                .source_ip_config()
                .map(|c| c.values().iter().filter_map(|v| v.parse().ok()).collect())
                .unwrap_or_default(),
        }),
        _ => None,
    }
}

fn observed_load_balancer(
    lb: &elb::LoadBalancer,
    tags: BTreeMap<String, String>,
    attributes: BTreeMap<String, String>,
) -> Result<ObservedLoadBalancer> {
    let subnet_mappings = lb
        .availability_zones()
        .iter()
        .filter_map(|az| {
            let address = az.load_balancer_addresses().first();
            Some(SubnetMapping {
                subnet_id: az.subnet_id()?.to_string(),
                allocation_id: address.and_then(|a| a.allocation_id().map(str::to_string)),
                private_ipv4_address: address
                    .and_then(|a| a.private_ipv4_address().map(str::to_string)),
            })
        })
        .collect();

    Ok(ObservedLoadBalancer {
        arn: lb.load_balancer_arn().unwrap_or_default().to_string(),
        name: lb.load_balancer_name().unwrap_or_default().to_string(),
        lb_type: match lb.r#type() {
            Some(elb::LoadBalancerTypeEnum::Network) => LoadBalancerType::Network,
            _ => LoadBalancerType::Application,
        },
        scheme: match lb.scheme() {
            Some(elb::LoadBalancerSchemeEnum::InternetFacing) => Scheme::InternetFacing,
            _ => Scheme::Internal,
        },
        ip_address_type: match lb.ip_address_type() {
            Some(elb::IpAddressType::Dualstack) => IpAddressType::Dualstack,
            Some(elb::IpAddressType::DualstackWithoutPublicIpv4) => {
                IpAddressType::DualstackWithoutPublicIpv4
            }
            _ => IpAddressType::Ipv4,
        },
        state: match lb.state().and_then(|s| s.code()) {
            Some(elb::LoadBalancerStateEnum::Active) => LoadBalancerState::Active,
            Some(elb::LoadBalancerStateEnum::Failed) => LoadBalancerState::Failed,
            _ => LoadBalancerState::Provisioning,
        },
        dns_name: lb.dns_name().unwrap_or_default().to_string(),
        canonical_hosted_zone_id: lb.canonical_hosted_zone_id().unwrap_or_default().to_string(),
        security_groups: lb.security_groups().to_vec(),
        subnet_mappings,
        attributes,
        tags,
    })
}

fn observed_target_group(
    tg: &elb::TargetGroup,
    tags: BTreeMap<String, String>,
    attributes: BTreeMap<String, String>,
) -> Result<ObservedTargetGroup> {
    Ok(ObservedTargetGroup {
        arn: tg.target_group_arn().unwrap_or_default().to_string(),
        name: tg.target_group_name().unwrap_or_default().to_string(),
        protocol: parse_protocol(tg.protocol())?,
        port: tg.port().unwrap_or_default() as u16,
        protocol_version: tg.protocol_version().and_then(parse_protocol_version),
        target_type: match tg.target_type() {
            Some(elb::TargetTypeEnum::Instance) => TargetType::Instance,
            _ => TargetType::Ip,
        },
        health_check: HealthCheck {
            protocol: parse_protocol(tg.health_check_protocol())?,
            path: tg.health_check_path().map(str::to_string),
            port: match tg.health_check_port() {
                Some("traffic-port") | None => HealthCheckPort::TrafficPort,
                Some(port) => port
                    .parse()
                    .map(HealthCheckPort::Number)
                    .unwrap_or(HealthCheckPort::TrafficPort),
            },
            interval_seconds: tg.health_check_interval_seconds().unwrap_or_default() as u16,
            timeout_seconds: tg.health_check_timeout_seconds().unwrap_or_default() as u16,
            healthy_threshold: tg.healthy_threshold_count().unwrap_or_default() as u16,
            unhealthy_threshold: tg.unhealthy_threshold_count().unwrap_or_default() as u16,
        },
        matcher: tg
            .matcher()
            .and_then(|m| m.http_code())
            .map(|code| Matcher {
                http_code: code.to_string(),
            }),
        attributes,
        tags,
    })
}

fn observed_listener(
    listener: &elb::Listener,
    certificates: Vec<String>,
) -> Result<ObservedListener> {
    Ok(ObservedListener {
        arn: listener.listener_arn().unwrap_or_default().to_string(),
        load_balancer_arn: listener.load_balancer_arn().unwrap_or_default().to_string(),
        port: listener.port().unwrap_or_default() as u16,
        protocol: parse_protocol(listener.protocol())?,
        default_actions: listener
            .default_actions()
            .iter()
            .map(from_sdk_action)
            .collect::<Result<Vec<_>>>()?,
        certificates,
        ssl_policy: listener.ssl_policy().map(str::to_string),
        alpn_policy: listener.alpn_policy().first().map(str::to_string),
    })
}

fn observed_rule(rule: &elb::Rule) -> Result<ObservedRule> {
    let is_default = rule.is_default().unwrap_or(false);
    Ok(ObservedRule {
        arn: rule.rule_arn().unwrap_or_default().to_string(),
        priority: rule.priority().and_then(|p| p.parse().ok()),
        is_default,
        conditions: rule.conditions().iter().filter_map(from_sdk_condition).collect(),
        actions: rule
            .actions()
            .iter()
            .map(from_sdk_action)
            .collect::<Result<Vec<_>>>()?,
    })
}

fn parse_protocol(protocol: Option<&elb::ProtocolEnum>) -> Result<Protocol> {
    protocol
        .map(|p| p.as_str().parse())
        .transpose()?
        .ok_or_else(|| Error::cloud("Unknown", "resource is missing a protocol"))
}

fn parse_protocol_version(version: &str) -> Option<ProtocolVersion> {
    match version {
        "HTTP1" => Some(ProtocolVersion::Http1),
        "HTTP2" => Some(ProtocolVersion::Http2),
        "GRPC" => Some(ProtocolVersion::Grpc),
        _ => None,
    }
}
