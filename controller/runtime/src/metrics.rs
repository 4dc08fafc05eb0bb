use alb_controller_deploy::DeployError;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ControllerLabels {
    controller: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorLabels {
    controller: String,
    resource_type: String,
    error_category: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct LoadBalancerLabels {
    stack: String,
    name: String,
}

/// Reconcile outcome counters plus a gauge family labeling every managed
/// load balancer.
#[derive(Clone)]
pub struct ControllerMetrics {
    reconciles: Family<ControllerLabels, Counter>,
    reconcile_errors: Family<ErrorLabels, Counter>,
    managed_load_balancers: Family<LoadBalancerLabels, Gauge>,
}

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let reconciles = Family::default();
        prom.register(
            "reconciles",
            "Count of completed reconciles per controller",
            reconciles.clone(),
        );

        let reconcile_errors = Family::default();
        prom.register(
            "reconcile_errors",
            "Count of reconcile errors by resource type and error category",
            reconcile_errors.clone(),
        );

        let managed_load_balancers = Family::default();
        prom.register(
            "managed_load_balancers",
            "Gauge labeling each load balancer managed by this controller",
            managed_load_balancers.clone(),
        );

        Self {
            reconciles,
            reconcile_errors,
            managed_load_balancers,
        }
    }

    pub fn observe_reconcile(&self, controller: &str) {
        self.reconciles
            .get_or_create(&ControllerLabels {
                controller: controller.to_string(),
            })
            .inc();
    }

    /// Increments the error counter at the throw site's labels; the caller
    /// then unwraps the inner error for scheduling.
    pub fn observe_error(&self, controller: &str, error: &DeployError) {
        self.reconcile_errors
            .get_or_create(&ErrorLabels {
                controller: controller.to_string(),
                resource_type: error.resource_type.to_string(),
                error_category: error.category().to_string(),
            })
            .inc();
    }

    pub fn set_managed_load_balancer(&self, stack: &str, name: &str, managed: bool) {
        self.managed_load_balancers
            .get_or_create(&LoadBalancerLabels {
                stack: stack.to_string(),
                name: name.to_string(),
            })
            .set(i64::from(managed));
    }
}
