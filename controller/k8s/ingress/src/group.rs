//! Ingress group membership.
//!
//! Ingresses carrying the same `group.name` annotation reconcile into one
//! stack; an Ingress without it forms an implicit single-member group. The
//! index watches Ingresses and Services, keeps the parsed view of each
//! member, and enqueues the owning group key whenever anything it depends on
//! changes.

use crate::annotations::IngressAnnotations;
use ahash::AHashMap as HashMap;
use alb_controller_core::{model::binding::ServicePort, Error, Result, StackId};
use alb_controller_k8s_api::{
    ingress_class_params::IngressClassParamsSpec,
    load_balancer_configuration::LoadBalancerConfigurationSpec,
    target_group_configuration::TargetGroupConfigurationSpec,
    Ingress, IngressBackend, IngressClassParams, LoadBalancerConfiguration, ResourceExt, Service,
    TargetGroupConfiguration,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// The legacy class annotation, honored alongside `spec.ingressClassName`.
const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

pub type SharedGroupIndex = Arc<RwLock<GroupIndex>>;

/// Names one logical group: the stack key under reconciliation.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum GroupKey {
    /// A standalone Ingress.
    Implicit { namespace: String, name: String },
    /// An explicitly named IngressGroup.
    Explicit(String),
}

impl GroupKey {
    pub fn stack_id(&self) -> StackId {
        match self {
            GroupKey::Implicit { namespace, name } => StackId::new(namespace, name),
            GroupKey::Explicit(name) => StackId::group(name),
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupKey::Implicit { namespace, name } => write!(f, "{namespace}/{name}"),
            GroupKey::Explicit(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceBackendRef {
    pub name: String,
    pub port: ServicePort,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathRule {
    pub path: String,
    pub backend: ServiceBackendRef,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoutingRule {
    pub host: Option<String>,
    pub paths: Vec<PathRule>,
}

/// The parsed, validated view of one group member.
#[derive(Clone, Debug, PartialEq)]
pub struct IngressGroupMember {
    pub namespace: String,
    pub name: String,
    pub generation: Option<i64>,
    pub annotations: IngressAnnotations,
    pub default_backend: Option<ServiceBackendRef>,
    pub rules: Vec<RoutingRule>,
    pub tls_hosts: Vec<String>,
    pub deleting: bool,
}

impl IngressGroupMember {
    pub fn from_ingress(ingress: &Ingress, strict: bool) -> Result<Self> {
        let namespace = ingress
            .namespace()
            .ok_or_else(|| Error::config("Ingress must be namespaced"))?;
        let name = ingress.name_unchecked();
        let annotations = IngressAnnotations::parse(&metadata_annotations(ingress), strict)?;

        let spec = ingress.spec.as_ref();
        let default_backend = spec
            .and_then(|s| s.default_backend.as_ref())
            .map(backend_ref)
            .transpose()?;

        let mut rules = Vec::new();
        for rule in spec.and_then(|s| s.rules.as_ref()).into_iter().flatten() {
            let mut paths = Vec::new();
            for path in rule
                .http
                .as_ref()
                .map(|http| http.paths.as_slice())
                .unwrap_or_default()
            {
                let backend = backend_ref(&path.backend)?;
                paths.push(PathRule {
                    path: path.path.clone().unwrap_or_else(|| "/".to_string()),
                    backend,
                });
            }
            rules.push(RoutingRule {
                host: rule.host.clone(),
                paths,
            });
        }

        let mut tls_hosts: Vec<String> = spec
            .and_then(|s| s.tls.as_ref())
            .into_iter()
            .flatten()
            .flat_map(|tls| tls.hosts.iter().flatten().cloned())
            .collect();
        tls_hosts.sort();
        tls_hosts.dedup();

        Ok(Self {
            namespace,
            name,
            generation: ingress.metadata.generation,
            annotations,
            default_backend,
            rules,
            tls_hosts,
            deleting: ingress.metadata.deletion_timestamp.is_some(),
        })
    }

    pub fn group_key(&self) -> GroupKey {
        match &self.annotations.group_name {
            Some(group) => GroupKey::Explicit(group.clone()),
            None => GroupKey::Implicit {
                namespace: self.namespace.clone(),
                name: self.name.clone(),
            },
        }
    }
}

fn metadata_annotations(ingress: &Ingress) -> std::collections::BTreeMap<String, String> {
    ingress.metadata.annotations.clone().unwrap_or_default()
}

fn backend_ref(backend: &IngressBackend) -> Result<ServiceBackendRef> {
    let service = backend
        .service
        .as_ref()
        .ok_or_else(|| Error::config("Ingress backend must reference a Service"))?;
    let port = service
        .port
        .as_ref()
        .ok_or_else(|| Error::config("Ingress backend must name a Service port"))?;
    let port = match (&port.number, &port.name) {
        (Some(number), _) => ServicePort::Number(
            u16::try_from(*number)
                .map_err(|_| Error::config(format!("invalid service port {number}")))?,
        ),
        (None, Some(name)) => ServicePort::Name(name.clone()),
        (None, None) => return Err(Error::config("Ingress backend port is empty")),
    };
    Ok(ServiceBackendRef {
        name: service.name.clone(),
        port,
    })
}

/// One port of a watched Service, with the fields target resolution needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServicePortSummary {
    pub name: Option<String>,
    pub port: u16,
    pub node_port: Option<u16>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServiceSummary {
    pub ports: Vec<ServicePortSummary>,
}

enum MemberState {
    Valid(Box<IngressGroupMember>),
    /// Parse failed; the reconciler surfaces the message as a Warning event
    /// and skips the member until it is mutated.
    Invalid { message: String },
}

/// A member whose annotations failed to parse. The reconciler emits a
/// Warning event and the object stays skipped until it is edited.
#[derive(Clone, Debug)]
pub struct InvalidMember {
    pub namespace: String,
    pub name: String,
    pub message: String,
}

pub struct GroupMembers {
    pub valid: Vec<IngressGroupMember>,
    pub invalid: Vec<InvalidMember>,
}

pub struct GroupIndex {
    ingress_class: Option<String>,
    strict: bool,
    updates: UnboundedSender<GroupKey>,
    members: HashMap<(String, String), (GroupKey, MemberState)>,
    services: HashMap<(String, String), ServiceSummary>,
    /// Class-level defaults, keyed to the claimed ingress class by name.
    class_params: Option<IngressClassParamsSpec>,
    lb_configs: HashMap<(String, String), LoadBalancerConfigurationSpec>,
    /// Keyed `(namespace, object name)`; each names the service it covers.
    tg_configs: HashMap<(String, String), TargetGroupConfigurationSpec>,
}

impl GroupIndex {
    pub fn shared(
        ingress_class: Option<String>,
        strict: bool,
        updates: UnboundedSender<GroupKey>,
    ) -> SharedGroupIndex {
        Arc::new(RwLock::new(Self {
            ingress_class,
            strict,
            updates,
            members: HashMap::new(),
            services: HashMap::new(),
            class_params: None,
            lb_configs: HashMap::new(),
            tg_configs: HashMap::new(),
        }))
    }

    /// Members of a group, ordered by explicit group order then by
    /// namespace/name so rule priorities are stable across reconciles.
    /// Invalid members surface separately for event reporting.
    pub fn members_of(&self, key: &GroupKey) -> GroupMembers {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for ((namespace, name), (group, state)) in &self.members {
            if group != key {
                continue;
            }
            match state {
                MemberState::Valid(member) => valid.push((*member).clone()),
                MemberState::Invalid { message } => invalid.push(InvalidMember {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    message: message.clone(),
                }),
            }
        }
        valid.sort_by(|a, b| {
            (a.annotations.group_order, &a.namespace, &a.name).cmp(&(
                b.annotations.group_order,
                &b.namespace,
                &b.name,
            ))
        });
        GroupMembers { valid, invalid }
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<ServiceSummary> {
        self.services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// A snapshot of every watched Service, keyed `(namespace, name)`, for
    /// the builder's backend resolution.
    pub fn services_snapshot(&self) -> HashMap<(String, String), ServiceSummary> {
        self.services.clone()
    }

    pub fn class_params(&self) -> Option<IngressClassParamsSpec> {
        self.class_params.clone()
    }

    pub fn load_balancer_configuration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<LoadBalancerConfigurationSpec> {
        self.lb_configs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Snapshot keyed by `(namespace, service name)` for the builder.
    pub fn target_group_configurations(
        &self,
    ) -> HashMap<(String, String), TargetGroupConfigurationSpec> {
        self.tg_configs
            .iter()
            .map(|((namespace, _), spec)| {
                ((namespace.clone(), spec.service_name.clone()), spec.clone())
            })
            .collect()
    }

    fn enqueue_all_groups(&self) {
        let groups: ahash::AHashSet<GroupKey> =
            self.members.values().map(|(group, _)| group.clone()).collect();
        for group in groups {
            self.enqueue(group);
        }
    }

    fn enqueue_groups_in_namespace(&self, namespace: &str) {
        let groups: ahash::AHashSet<GroupKey> = self
            .members
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, (group, _))| group.clone())
            .collect();
        for group in groups {
            self.enqueue(group);
        }
    }

    fn matches_class(&self, ingress: &Ingress) -> bool {
        let Some(wanted) = &self.ingress_class else {
            return true;
        };
        let by_spec = ingress
            .spec
            .as_ref()
            .and_then(|s| s.ingress_class_name.as_ref());
        let annotations = ingress.metadata.annotations.clone().unwrap_or_default();
        let by_annotation = annotations.get(INGRESS_CLASS_ANNOTATION);
        by_spec == Some(wanted) || by_annotation == Some(wanted)
    }

    fn enqueue(&self, key: GroupKey) {
        if let Err(error) = self.updates.send(key.clone()) {
            tracing::error!(group = %key, %error, "Failed to enqueue group");
        }
    }

    fn remove_member(&mut self, namespace: String, name: String) {
        if let Some((group, _)) = self.members.remove(&(namespace, name)) {
            self.enqueue(group);
        }
    }
}

impl kubert::index::IndexNamespacedResource<Ingress> for GroupIndex {
    fn apply(&mut self, ingress: Ingress) {
        let namespace = ingress.namespace().expect("Ingress must have a namespace");
        let name = ingress.name_unchecked();

        if !self.matches_class(&ingress) {
            self.remove_member(namespace, name);
            return;
        }

        let (group, state) = match IngressGroupMember::from_ingress(&ingress, self.strict) {
            Ok(member) => (member.group_key(), MemberState::Valid(Box::new(member))),
            Err(error) => {
                tracing::info!(%namespace, %name, %error, "Invalid Ingress");
                (
                    GroupKey::Implicit {
                        namespace: namespace.clone(),
                        name: name.clone(),
                    },
                    MemberState::Invalid {
                        message: error.to_string(),
                    },
                )
            }
        };

        // A group.name edit moves the member; the old group must reconcile
        // too so the departed member's resources are pruned there.
        if let Some((previous, _)) = self
            .members
            .insert((namespace, name), (group.clone(), state))
        {
            if previous != group {
                self.enqueue(previous);
            }
        }
        self.enqueue(group);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.remove_member(namespace, name);
    }
}

impl kubert::index::IndexNamespacedResource<Service> for GroupIndex {
    fn apply(&mut self, service: Service) {
        let namespace = service.namespace().expect("Service must have a namespace");
        let name = service.name_unchecked();

        let ports = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|p| ServicePortSummary {
                        name: p.name.clone(),
                        port: p.port as u16,
                        node_port: p.node_port.and_then(|n| u16::try_from(n).ok()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.services
            .insert((namespace.clone(), name.clone()), ServiceSummary { ports });
        self.touch_groups_referencing(&namespace, &name);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.services.remove(&(namespace.clone(), name.clone()));
        self.touch_groups_referencing(&namespace, &name);
    }
}

impl kubert::index::IndexClusterResource<IngressClassParams> for GroupIndex {
    fn apply(&mut self, params: IngressClassParams) {
        // Only the parameters object named after the claimed class applies.
        if self.ingress_class.as_deref() != Some(params.name_unchecked().as_str()) {
            return;
        }
        self.class_params = Some(params.spec);
        self.enqueue_all_groups();
    }

    fn delete(&mut self, name: String) {
        if self.ingress_class.as_deref() == Some(name.as_str()) && self.class_params.take().is_some()
        {
            self.enqueue_all_groups();
        }
    }
}

impl kubert::index::IndexNamespacedResource<LoadBalancerConfiguration> for GroupIndex {
    fn apply(&mut self, config: LoadBalancerConfiguration) {
        let namespace = config
            .namespace()
            .expect("LoadBalancerConfiguration must have a namespace");
        let name = config.name_unchecked();
        self.lb_configs
            .insert((namespace.clone(), name), config.spec);
        self.enqueue_groups_in_namespace(&namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.lb_configs.remove(&(namespace.clone(), name));
        self.enqueue_groups_in_namespace(&namespace);
    }
}

impl kubert::index::IndexNamespacedResource<TargetGroupConfiguration> for GroupIndex {
    fn apply(&mut self, config: TargetGroupConfiguration) {
        let namespace = config
            .namespace()
            .expect("TargetGroupConfiguration must have a namespace");
        let name = config.name_unchecked();
        let service = config.spec.service_name.clone();
        self.tg_configs.insert((namespace.clone(), name), config.spec);
        self.touch_groups_referencing(&namespace, &service);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(spec) = self.tg_configs.remove(&(namespace.clone(), name)) {
            self.touch_groups_referencing(&namespace, &spec.service_name);
        }
    }
}

impl GroupIndex {
    fn touch_groups_referencing(&mut self, namespace: &str, service: &str) {
        let groups: ahash::AHashSet<GroupKey> = self
            .members
            .values()
            .filter_map(|(group, state)| match state {
                MemberState::Valid(member) if member.namespace == namespace => {
                    let references = member
                        .default_backend
                        .iter()
                        .chain(member.rules.iter().flat_map(|r| r.paths.iter().map(|p| &p.backend)))
                        .any(|backend| backend.name == service);
                    references.then(|| group.clone())
                }
                _ => None,
            })
            .collect();
        for group in groups {
            self.enqueue(group);
        }
    }
}
