use crate::{
    index_list::IndexList,
    lease,
    metrics::ControllerMetrics,
    queue::WorkQueue,
    reconciler::GroupReconciler,
    status::StatusClient,
};
use alb_controller_core::{
    model::{
        load_balancer::{IpAddressType, Scheme},
        target_group::TargetType,
    },
    tags::TagProvider,
};
use alb_controller_k8s_api::{
    Endpoints, Ingress, IngressClassParams, LoadBalancerConfiguration, Node, Service,
    TargetGroupBinding, TargetGroupConfiguration,
};
use alb_controller_k8s_binding as binding;
use alb_controller_k8s_ingress::{BuildDefaults, GroupIndex};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "alb-controller", about = "An AWS load balancer ingress controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "alb_controller=info,warn",
        env = "ALB_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Name of the Kubernetes cluster; stamped as the cluster tag on every
    /// managed cloud resource.
    #[clap(long)]
    cluster_name: String,

    /// Restrict watches to one namespace instead of the whole cluster.
    #[clap(long)]
    watch_namespace: Option<String>,

    /// IngressClass this controller claims.
    #[clap(long, default_value = "alb")]
    ingress_class: String,

    /// Tags merged onto every managed resource (`key=value,...`).
    #[clap(long)]
    default_tags: Option<String>,

    /// Tag keys owned by an external system; never written or removed.
    #[clap(long)]
    external_managed_tags: Option<String>,

    #[clap(long, default_value = "instance")]
    default_target_type: String,

    #[clap(long, default_value = "ELBSecurityPolicy-2016-08")]
    default_ssl_policy: String,

    #[clap(long, default_value = "internal")]
    default_load_balancer_scheme: String,

    #[clap(long, default_value = "ipv4")]
    default_ip_address_type: String,

    /// Subnets (ids or Name tags) used when the subnets annotation is
    /// absent.
    #[clap(long)]
    default_subnets: Option<String>,

    /// Manage a shared backend security group for data-path access.
    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_backend_sg: bool,

    /// Grant backend access on all ports instead of each target port.
    #[clap(long)]
    disable_restricted_sg_rules: bool,

    /// Toggles, `Gate=bool` comma list. Known gates: ListenerRulesTagging,
    /// WeightedTargetGroups, EndpointsFailOpen, EnableIPTargetType,
    /// SubnetsClusterTagCheck, EnableDefaultTagsLowPriority.
    #[clap(long, default_value = "")]
    feature_gates: FeatureGates,

    /// Period, in seconds, between full resyncs of steady groups.
    #[clap(long, default_value = "3600")]
    sync_period: u64,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_waf: bool,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_wafv2: bool,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_shield: bool,

    /// LoadBalancerClass claimed by the service-facing side of this
    /// controller.
    #[clap(long, default_value = "service.k8s.aws/nlb")]
    load_balancer_class: String,

    /// TTL, in seconds, of the certificate tag cache.
    #[clap(long, default_value = "1200")]
    acm_cache_ttl: u64,

    /// Ceiling, in seconds, on waiting for a requested certificate to be
    /// issued.
    #[clap(long, default_value = "300")]
    certificate_validate_wait: u64,

    /// Window, in seconds, after which a still-pending certificate is
    /// re-issued.
    #[clap(long, default_value = "900")]
    certificate_reissue_wait: u64,

    /// Reject unknown annotation keys under the controller prefix.
    #[clap(long)]
    strict_annotation_validation: bool,

    /// Concurrent reconcile workers per controller.
    #[clap(long, default_value = "3")]
    reconcile_workers: usize,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            cluster_name,
            watch_namespace,
            ingress_class,
            default_tags,
            external_managed_tags,
            default_target_type,
            default_ssl_policy,
            default_load_balancer_scheme,
            default_ip_address_type,
            default_subnets,
            enable_backend_sg,
            disable_restricted_sg_rules,
            feature_gates,
            sync_period,
            enable_waf,
            enable_wafv2,
            enable_shield,
            load_balancer_class,
            acm_cache_ttl,
            certificate_validate_wait,
            certificate_reissue_wait,
            strict_annotation_validation,
            reconcile_workers,
        } = self;

        // Configuration validation happens before anything touches the
        // cluster or the cloud; failures exit non-zero.
        let default_tags = parse_tag_map(default_tags.as_deref())?;
        let external_managed: BTreeSet<String> = external_managed_tags
            .as_deref()
            .map(parse_csv)
            .unwrap_or_default()
            .into_iter()
            .collect();
        let tags = TagProvider::new(cluster_name.clone(), default_tags, external_managed)
            .context("invalid tag configuration")?;

        let defaults = BuildDefaults {
            target_type: TargetType::from_str(&default_target_type)
                .context("invalid --default-target-type")?,
            scheme: Scheme::from_str(&default_load_balancer_scheme)
                .context("invalid --default-load-balancer-scheme")?,
            ip_address_type: IpAddressType::from_str(&default_ip_address_type)
                .context("invalid --default-ip-address-type")?,
            ssl_policy: default_ssl_policy,
            enable_backend_sg,
            disable_restricted_sg_rules,
            listener_rules_tagging: feature_gates.listener_rules_tagging,
        };
        if defaults.target_type == TargetType::Ip && !feature_gates.enable_ip_target_type {
            bail!("--default-target-type=ip requires the EnableIPTargetType feature gate");
        }
        info!(
            waf = enable_waf,
            wafv2 = enable_wafv2,
            shield = enable_shield,
            load_balancer_class = %load_balancer_class,
            gates = ?feature_gates,
            "Addon configuration"
        );

        let mut prom = <Registry>::default();
        let metrics = ControllerMetrics::register(prom.sub_registry_with_prefix("alb_controller"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "alb-controller".to_string());
        let lease_namespace =
            std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "kube-system".to_string());
        let claims = lease::init(&runtime, &lease_namespace, &hostname).await?;

        let cloud = alb_controller_aws::cloud_from_env(Duration::from_secs(acm_cache_ttl)).await;

        // The ingress side: group index fed by Ingress and Service watches,
        // draining into the coalescing work queue.
        let (groups_tx, mut groups_rx) = mpsc::unbounded_channel();
        let group_index = GroupIndex::shared(
            Some(ingress_class),
            strict_annotation_validation,
            groups_tx,
        );

        // The binding side: its own index and queue over the CRD plus the
        // endpoints it projects.
        let (bindings_tx, bindings_rx) = mpsc::unbounded_channel();
        let binding_index = binding::BindingIndex::shared(bindings_tx);

        let watch_cfg = watcher::Config::default();
        macro_rules! watch {
            ($ty:ty) => {
                match &watch_namespace {
                    Some(namespace) => {
                        runtime.watch_namespaced::<$ty>(namespace, watch_cfg.clone())
                    }
                    None => runtime.watch_all::<$ty>(watch_cfg.clone()),
                }
            };
        }

        let ingresses = watch!(Ingress);
        tokio::spawn(
            kubert::index::namespaced(group_index.clone(), ingresses)
                .instrument(info_span!("ingresses")),
        );

        let services = watch!(Service);
        let services_indexes = IndexList::new(group_index.clone())
            .push(binding_index.clone())
            .shared();
        tokio::spawn(
            kubert::index::namespaced(services_indexes, services)
                .instrument(info_span!("services")),
        );

        let endpoints = watch!(Endpoints);
        tokio::spawn(
            kubert::index::namespaced(binding_index.clone(), endpoints)
                .instrument(info_span!("endpoints")),
        );

        let class_params = runtime.watch_all::<IngressClassParams>(watch_cfg.clone());
        tokio::spawn(
            kubert::index::cluster(group_index.clone(), class_params)
                .instrument(info_span!("ingressclassparams")),
        );

        let lb_configurations = watch!(LoadBalancerConfiguration);
        tokio::spawn(
            kubert::index::namespaced(group_index.clone(), lb_configurations)
                .instrument(info_span!("loadbalancerconfigurations")),
        );

        let tg_configurations = watch!(TargetGroupConfiguration);
        tokio::spawn(
            kubert::index::namespaced(group_index.clone(), tg_configurations)
                .instrument(info_span!("targetgroupconfigurations")),
        );

        let target_group_bindings = watch!(TargetGroupBinding);
        tokio::spawn(
            kubert::index::namespaced(binding_index.clone(), target_group_bindings)
                .instrument(info_span!("targetgroupbindings")),
        );

        let nodes = runtime.watch_all::<Node>(watch_cfg.clone());
        tokio::spawn(
            kubert::index::cluster(binding_index.clone(), nodes).instrument(info_span!("nodes")),
        );

        // Forward group signals into the coalescing queue.
        let queue = WorkQueue::new();
        {
            let queue = queue.clone();
            tokio::spawn(async move {
                while let Some(key) = groups_rx.recv().await {
                    queue.enqueue(key);
                }
            });
        }

        let reconciler = Arc::new(GroupReconciler {
            cloud: cloud.clone(),
            tags,
            status: StatusClient::new(runtime.client(), &hostname),
            groups: group_index,
            defaults,
            deploy_config: alb_controller_deploy::DeployConfig {
                validate_wait: Duration::from_secs(certificate_validate_wait),
                reissue_wait: chrono::Duration::seconds(certificate_reissue_wait as i64),
                ..Default::default()
            },
            metrics,
            queue,
            claims,
            hostname,
            sync_period: Duration::from_secs(sync_period),
            default_subnets: default_subnets.as_deref().map(parse_csv).unwrap_or_default(),
            attempts: Default::default(),
        });
        tokio::spawn(
            reconciler
                .run(reconcile_workers)
                .instrument(info_span!("ingress_reconciler")),
        );

        let binding_controller = binding::Controller::new(
            runtime.client(),
            cloud.elbv2.clone(),
            cloud.ec2.clone(),
            cluster_name,
            binding_index,
            bindings_rx,
            feature_gates.endpoints_fail_open,
        );
        tokio::spawn(
            binding_controller
                .process_updates()
                .instrument(info_span!("binding_controller")),
        );

        info!("Controller started");
        // Block the main thread on the shutdown signal. Once it fires, wait
        // for the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Known feature gates with their defaults; unknown names are rejected.
#[derive(Clone, Debug)]
pub struct FeatureGates {
    pub listener_rules_tagging: bool,
    pub weighted_target_groups: bool,
    pub endpoints_fail_open: bool,
    pub enable_ip_target_type: bool,
    pub subnets_cluster_tag_check: bool,
    pub enable_default_tags_low_priority: bool,
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self {
            listener_rules_tagging: true,
            weighted_target_groups: true,
            endpoints_fail_open: false,
            enable_ip_target_type: true,
            subnets_cluster_tag_check: true,
            enable_default_tags_low_priority: false,
        }
    }
}

impl FromStr for FeatureGates {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut gates = Self::default();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((name, value)) = entry.split_once('=') else {
                bail!("malformed feature gate {entry:?} (expected Gate=bool)");
            };
            let value: bool = value
                .parse()
                .with_context(|| format!("invalid boolean for feature gate {name}"))?;
            match name {
                "ListenerRulesTagging" => gates.listener_rules_tagging = value,
                "WeightedTargetGroups" => gates.weighted_target_groups = value,
                "EndpointsFailOpen" => gates.endpoints_fail_open = value,
                "EnableIPTargetType" => gates.enable_ip_target_type = value,
                "SubnetsClusterTagCheck" => gates.subnets_cluster_tag_check = value,
                "EnableDefaultTagsLowPriority" => gates.enable_default_tags_low_priority = value,
                unknown => bail!("unknown feature gate {unknown:?}"),
            }
        }
        Ok(gates)
    }
}

fn parse_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_tag_map(s: Option<&str>) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for entry in s.unwrap_or_default().split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("malformed tag {entry:?} (expected key=value)");
        };
        out.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::FeatureGates;

    #[test]
    fn feature_gates_parse_overrides() {
        let gates: FeatureGates = "EndpointsFailOpen=true,ListenerRulesTagging=false"
            .parse()
            .unwrap();
        assert!(gates.endpoints_fail_open);
        assert!(!gates.listener_rules_tagging);
        // Untouched gates keep their defaults.
        assert!(gates.enable_ip_target_type);
    }

    #[test]
    fn unknown_feature_gate_is_rejected() {
        assert!("NoSuchGate=true".parse::<FeatureGates>().is_err());
    }

    #[test]
    fn malformed_tag_maps_are_rejected() {
        assert!(super::parse_tag_map(Some("team")).is_err());
        let tags = super::parse_tag_map(Some("team=a, env=prod")).unwrap();
        assert_eq!(tags["team"], "a");
        assert_eq!(tags["env"], "prod");
    }
}
