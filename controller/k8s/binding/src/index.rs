use ahash::AHashMap as HashMap;
use alb_controller_k8s_api::{Endpoints, Node, ResourceExt, Service, TargetGroupBinding};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub type SharedBindingIndex = Arc<RwLock<BindingIndex>>;

/// Names one TargetGroupBinding.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct BindingRef {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for BindingRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Holds the watched state a binding reconcile reads: the bindings
/// themselves plus the Services, Endpoints, and Nodes they project targets
/// from. Every apply or delete enqueues the affected bindings.
pub struct BindingIndex {
    updates: UnboundedSender<BindingRef>,
    bindings: HashMap<BindingRef, TargetGroupBinding>,
    services: HashMap<(String, String), Service>,
    endpoints: HashMap<(String, String), Endpoints>,
    nodes: HashMap<String, Node>,
}

impl BindingIndex {
    pub fn shared(updates: UnboundedSender<BindingRef>) -> SharedBindingIndex {
        Arc::new(RwLock::new(Self {
            updates,
            bindings: HashMap::new(),
            services: HashMap::new(),
            endpoints: HashMap::new(),
            nodes: HashMap::new(),
        }))
    }

    pub fn binding(&self, id: &BindingRef) -> Option<TargetGroupBinding> {
        self.bindings.get(id).cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn endpoints(&self, namespace: &str, name: &str) -> Option<Endpoints> {
        self.endpoints
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.values().cloned().collect()
    }

    fn enqueue(&self, id: BindingRef) {
        if let Err(error) = self.updates.send(id.clone()) {
            tracing::error!(binding = %id, %error, "Failed to enqueue binding");
        }
    }

    /// Bindings in `namespace` that reference the named service.
    fn enqueue_service_dependents(&self, namespace: &str, service: &str) {
        for (id, binding) in &self.bindings {
            if id.namespace == namespace && binding.spec.service_ref.name == service {
                self.enqueue(id.clone());
            }
        }
    }

    /// Node changes affect every instance-mode binding.
    fn enqueue_instance_bindings(&self) {
        for (id, binding) in &self.bindings {
            if binding.spec.target_type.as_deref() == Some("instance") {
                self.enqueue(id.clone());
            }
        }
    }
}

impl kubert::index::IndexNamespacedResource<TargetGroupBinding> for BindingIndex {
    fn apply(&mut self, binding: TargetGroupBinding) {
        let namespace = binding
            .namespace()
            .expect("TargetGroupBinding must have a namespace");
        let name = binding.name_unchecked();
        let id = BindingRef { namespace, name };
        self.bindings.insert(id.clone(), binding);
        self.enqueue(id);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.bindings.remove(&BindingRef { namespace, name });
        // Nothing to reconcile: the cloud side is torn down by the stack
        // deployer when the target group goes.
    }
}

impl kubert::index::IndexNamespacedResource<Service> for BindingIndex {
    fn apply(&mut self, service: Service) {
        let namespace = service.namespace().expect("Service must have a namespace");
        let name = service.name_unchecked();
        self.services
            .insert((namespace.clone(), name.clone()), service);
        self.enqueue_service_dependents(&namespace, &name);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.services.remove(&(namespace.clone(), name.clone()));
        self.enqueue_service_dependents(&namespace, &name);
    }
}

impl kubert::index::IndexNamespacedResource<Endpoints> for BindingIndex {
    fn apply(&mut self, endpoints: Endpoints) {
        let namespace = endpoints
            .namespace()
            .expect("Endpoints must have a namespace");
        let name = endpoints.name_unchecked();
        self.endpoints
            .insert((namespace.clone(), name.clone()), endpoints);
        self.enqueue_service_dependents(&namespace, &name);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.endpoints.remove(&(namespace.clone(), name.clone()));
        self.enqueue_service_dependents(&namespace, &name);
    }
}

impl kubert::index::IndexClusterResource<Node> for BindingIndex {
    fn apply(&mut self, node: Node) {
        let name = node.name_unchecked();
        self.nodes.insert(name, node);
        self.enqueue_instance_bindings();
    }

    fn delete(&mut self, name: String) {
        self.nodes.remove(&name);
        self.enqueue_instance_bindings();
    }
}
