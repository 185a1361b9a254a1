//! Instance Reconciler (`SPEC_FULL.md` §4.9): polls cloud providers for
//! every non-terminal instance and writes back normalized status + IP.

use std::collections::HashMap;
use std::sync::Arc;

use cadre_cloud::CloudProvider;
use cadre_storage::InstanceRepository;
use cadre_storage_pg::PgInstanceRepository;
use sqlx::PgPool;

use crate::error::TaskError;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileSummary {
    pub updated: u32,
    pub errored: u32,
}

#[tracing::instrument(name = "tasks.instance_reconciler.run", skip_all, err)]
pub async fn run_instance_reconciler(
    pool: &PgPool,
    providers: &HashMap<String, Arc<dyn CloudProvider>>,
) -> Result<ReconcileSummary, TaskError> {
    let mut tx = pool.begin().await?;
    let instances = PgInstanceRepository::new(&mut *tx).find_reconcilable().await?;
    tx.commit().await?;

    let total = instances.len();
    let mut summary = ReconcileSummary::default();

    for instance in instances {
        let Some(provider) = providers.get(&instance.provider) else {
            tracing::warn!(instance.id = %instance.id, provider = instance.provider, "no cloud provider configured for instance's provider tag");
            summary.errored += 1;
            continue;
        };

        let Some(provider_instance_id) = instance.provider_instance_id.as_deref() else {
            // find_reconcilable() only returns instances with a provider id; defensive only.
            continue;
        };

        match provider.get_instance_status(provider_instance_id).await {
            Ok(Some(status)) => {
                let normalized = provider.normalize_status(&status.raw_status);
                let ip = status.ip_address.clone().or_else(|| provider.extract_ip_address(&status.raw));

                let mut tx = pool.begin().await?;
                match PgInstanceRepository::new(&mut *tx).set_status(instance.id, normalized, ip.as_deref(), None).await {
                    Ok(_) => {
                        tx.commit().await?;
                        summary.updated += 1;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, instance.id = %instance.id, "failed to persist reconciled instance status");
                        summary.errored += 1;
                    }
                }
            }
            Ok(None) => {
                tracing::warn!(instance.id = %instance.id, provider_instance_id, "provider reports instance no longer exists");
                summary.errored += 1;
            }
            Err(err) => {
                tracing::warn!(error = %err, instance.id = %instance.id, "status poll failed");
                summary.errored += 1;
            }
        }
    }

    tracing::info!(total, updated = summary.updated, errored = summary.errored, "instance reconciliation tick complete");
    Ok(summary)
}
