use crate::{
    error::{Error, Result},
    resource::{ResourceId, ResourceKind, ResourceSpec, ResourceStatus},
    token::StringToken,
};
use ahash::AHashMap as HashMap;
use std::fmt;

/// Names a stack: `<namespace>/<name>` for a standalone Ingress, or the bare
/// group name for an explicit IngressGroup. The rendered form is the stack
/// tag value and the `resource-id` prefix on every owned cloud object.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct StackId {
    pub namespace: String,
    pub name: String,
}

impl StackId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// A stack for an explicitly named IngressGroup; such stacks are not
    /// namespace-scoped.
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

struct Entry {
    spec: ResourceSpec,
    status: Option<ResourceStatus>,
    /// Resources whose tokens this spec consumes.
    deps: Vec<ResourceId>,
}

/// A named collection of desired resources and the dependency DAG between
/// them.
///
/// Invariants: no cycles, every resource belongs to exactly one stack, and a
/// topological order exists for both forward (create) and reverse (delete)
/// traversals. Dependency edges are derived from the tokens each spec
/// consumes at the time the resource is added.
pub struct Stack {
    id: StackId,
    order: Vec<ResourceId>,
    entries: HashMap<ResourceId, Entry>,
    /// Forward adjacency: producer to consumers.
    dependents: HashMap<ResourceId, Vec<ResourceId>>,
}

impl Stack {
    pub fn new(id: StackId) -> Self {
        Self {
            id,
            order: Vec::new(),
            entries: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    pub fn id(&self) -> &StackId {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.entries.contains_key(id)
    }

    /// Adds a resource, deriving dependency edges from the tokens its spec
    /// consumes. Every referent must already be in the stack; a duplicate id
    /// or a dangling reference is a programming error.
    pub fn add(&mut self, name: impl Into<String>, spec: ResourceSpec) -> Result<ResourceId> {
        let id = ResourceId::new(spec.kind(), name);
        if self.entries.contains_key(&id) {
            return Err(Error::fatal(format!("duplicate resource {id} in stack {}", self.id)));
        }

        let deps = spec.token_refs();
        for dep in &deps {
            if !self.entries.contains_key(dep) {
                return Err(Error::fatal(format!(
                    "resource {id} references {dep}, which is not in stack {}",
                    self.id
                )));
            }
            self.dependents.entry(dep.clone()).or_default().push(id.clone());
        }

        self.order.push(id.clone());
        self.entries.insert(
            id.clone(),
            Entry {
                spec,
                status: None,
                deps,
            },
        );
        Ok(id)
    }

    pub fn spec(&self, id: &ResourceId) -> Option<&ResourceSpec> {
        self.entries.get(id).map(|e| &e.spec)
    }

    pub fn status(&self, id: &ResourceId) -> Option<&ResourceStatus> {
        self.entries.get(id).and_then(|e| e.status.as_ref())
    }

    /// Records observed state for a resource, unblocking tokens that
    /// reference it.
    pub fn set_status(&mut self, id: &ResourceId, status: ResourceStatus) -> Result<()> {
        if status.kind() != id.kind {
            return Err(Error::fatal(format!(
                "status kind {} does not match resource {id}",
                status.kind()
            )));
        }
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.status = Some(status);
                Ok(())
            }
            None => Err(Error::fatal(format!("unknown resource {id} in stack {}", self.id))),
        }
    }

    /// Resources that consume tokens produced by `id`.
    pub fn dependents_of(&self, id: &ResourceId) -> &[ResourceId] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All resources of one kind, in insertion order.
    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceId> {
        self.order.iter().filter(move |id| id.kind == kind)
    }

    /// Resolves a token against recorded statuses. Reading a reference whose
    /// referent has no status yet, or whose field is empty, is an
    /// [`Error::Unfulfilled`], never an empty string.
    pub fn resolve(&self, token: &StringToken) -> Result<String> {
        match token {
            StringToken::Literal(value) => Ok(value.clone()),
            StringToken::Reference { resource, field } => {
                let unfulfilled = || Error::Unfulfilled {
                    resource: resource.clone(),
                    field: *field,
                };
                let entry = self.entries.get(resource).ok_or_else(unfulfilled)?;
                let status = entry.status.as_ref().ok_or_else(unfulfilled)?;
                match status.field(*field) {
                    Some(value) if !value.is_empty() => Ok(value.to_string()),
                    _ => Err(unfulfilled()),
                }
            }
        }
    }

    pub fn resolve_all(&self, tokens: &[StringToken]) -> Result<Vec<String>> {
        tokens.iter().map(|t| self.resolve(t)).collect()
    }

    /// Create-order traversal: every resource appears after all resources it
    /// depends on. Deterministic for a given insertion order. A cycle is a
    /// fatal invariant violation.
    pub fn topological_order(&self) -> Result<Vec<ResourceId>> {
        let mut placed: ahash::AHashSet<&ResourceId> = ahash::AHashSet::new();
        let mut out = Vec::with_capacity(self.order.len());

        while out.len() < self.order.len() {
            let before = out.len();
            for id in &self.order {
                if placed.contains(id) {
                    continue;
                }
                let entry = &self.entries[id];
                if entry.deps.iter().all(|d| placed.contains(d)) {
                    placed.insert(id);
                    out.push(id.clone());
                }
            }
            if out.len() == before {
                let stuck: Vec<String> = self
                    .order
                    .iter()
                    .filter(|id| !placed.contains(*id))
                    .map(|id| id.to_string())
                    .collect();
                return Err(Error::fatal(format!(
                    "dependency cycle in stack {} involving [{}]",
                    self.id,
                    stuck.join(", ")
                )));
            }
        }
        Ok(out)
    }

    /// Delete-order traversal: the reverse of [`Stack::topological_order`].
    pub fn reverse_topological_order(&self) -> Result<Vec<ResourceId>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }
}
