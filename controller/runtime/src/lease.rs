use alb_controller_k8s_api::{self as k8s, ObjectMeta};
use anyhow::Result;
use k8s_openapi::api::coordination::v1 as coordv1;
use kube::api::PatchParams;
use std::sync::Arc;
use tokio::{sync::watch, time};

const LEASE_DURATION: time::Duration = time::Duration::from_secs(30);
const LEASE_NAME: &str = "alb-controller-leader";
const RENEW_GRACE_PERIOD: time::Duration = time::Duration::from_secs(1);

/// Creates (if absent) and claims the controller's write lease. Reconcile
/// workers consult the returned claims watch and stand down while another
/// replica holds the lease.
pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    namespace: &str,
    hostname: &str,
) -> Result<watch::Receiver<Arc<kubert::lease::Claim>>> {
    let lease = coordv1::Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            // A resource version of "0" creates the Lease only when it does
            // not already exist.
            resource_version: Some("0".to_string()),
            labels: Some(
                [(
                    "app.kubernetes.io/part-of".to_string(),
                    "alb-controller".to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    };
    match k8s::Api::<coordv1::Lease>::namespaced(runtime.client(), namespace)
        .patch(
            LEASE_NAME,
            &PatchParams {
                field_manager: Some("alb-controller".to_string()),
                ..Default::default()
            },
            &kube::api::Patch::Apply(lease),
        )
        .await
    {
        Ok(_) => tracing::info!("Created Lease resource"),
        Err(k8s::Error::Api(_)) => tracing::debug!("Lease already exists, no need to create it"),
        Err(error) => return Err(error.into()),
    };

    let (claim, _task) = runtime
        .spawn_lease(kubert::LeaseParams {
            name: LEASE_NAME.to_string(),
            namespace: namespace.to_string(),
            claimant: hostname.to_string(),
            lease_duration: LEASE_DURATION,
            renew_grace_period: RENEW_GRACE_PERIOD,
            field_manager: Some("alb-controller".into()),
        })
        .await?;
    Ok(claim)
}
