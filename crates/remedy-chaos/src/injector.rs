//! Fault injector
//!
//! Applies a fault to one workload and hands back an [`InjectionRecord`]
//! describing how to undo it. At most one fault may be live per
//! (namespace, workload) pair; reverting is idempotent.

use crate::cluster::ClusterApi;
use crate::error::{ClusterError, InjectionError};
use crate::quantity::{ResourceList, ResourceRequirements};
use crate::templates::FaultTemplates;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use remedy_core::{CleanupHandle, FailureCategory, FailureSpec, InjectionRecord};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Resources a configuration fault shrinks the target to
#[must_use]
pub fn misconfigured_resources() -> ResourceRequirements {
    ResourceRequirements::new(
        ResourceList::new("1m", "100Mi"),
        ResourceList::new("2m", "200Mi"),
    )
}

/// What a revert call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertAck {
    /// The fault was withdrawn now
    Reverted,
    /// The fault had already been withdrawn
    AlreadyReverted,
    /// The fault is undone by the baseline restore
    DeferredToBaseline,
}

type TargetKey = (String, String);

/// Applies and withdraws faults
pub struct FaultInjector {
    cluster: Arc<dyn ClusterApi>,
    templates: FaultTemplates,
    active: DashMap<TargetKey, String>,
    delete_timeout: Duration,
}

impl FaultInjector {
    /// Create an injector with built-in templates
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            templates: FaultTemplates::builtin(),
            active: DashMap::new(),
            delete_timeout: Duration::from_secs(5),
        }
    }

    /// With templates
    #[must_use]
    pub fn with_templates(mut self, templates: FaultTemplates) -> Self {
        self.templates = templates;
        self
    }

    /// With the deletion timeout after which finalizers are cleared
    #[must_use]
    pub fn with_delete_timeout(mut self, delete_timeout: Duration) -> Self {
        self.delete_timeout = delete_timeout;
        self
    }

    /// Whether a fault is live on a workload
    #[must_use]
    pub fn is_active(&self, namespace: &str, workload: &str) -> bool {
        self.active
            .contains_key(&(namespace.to_string(), workload.to_string()))
    }

    /// Number of live faults
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Apply a fault
    ///
    /// Fails with [`InjectionError::AlreadyInjected`] when the target already
    /// carries a live fault. The target stays reserved until the returned
    /// record is reverted.
    pub async fn inject(&self, spec: &FailureSpec) -> Result<InjectionRecord, InjectionError> {
        let key = (spec.target.namespace.clone(), spec.target.workload.clone());
        match self.active.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(InjectionError::AlreadyInjected {
                    namespace: key.0,
                    workload: key.1,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(spec.experiment_id.clone());
            }
        }

        let applied = if spec.category.uses_chaos_resource() {
            self.apply_chaos(spec).await
        } else {
            self.apply_misconfiguration(spec).await
        };

        match applied {
            Ok(cleanup) => {
                tracing::info!(
                    experiment = %spec.experiment_id,
                    category = %spec.category,
                    target = %spec.target,
                    "fault applied"
                );
                Ok(InjectionRecord::applied(spec.clone(), cleanup))
            }
            Err(e) => {
                self.active.remove(&key);
                tracing::warn!(target = %spec.target, error = %e, "fault injection failed");
                Err(e)
            }
        }
    }

    async fn apply_chaos(&self, spec: &FailureSpec) -> Result<CleanupHandle, InjectionError> {
        let rendered = self.templates.render(spec)?;
        self.cluster
            .apply_manifest(&spec.target.namespace, &rendered.manifest)
            .await
            .map_err(InjectionError::Apply)?;
        Ok(CleanupHandle::DeleteResource {
            resource_kind: rendered.kind,
            name: rendered.name,
            clear_finalizers_on_stall: spec.category == FailureCategory::DiskIo,
        })
    }

    async fn apply_misconfiguration(
        &self,
        spec: &FailureSpec,
    ) -> Result<CleanupHandle, InjectionError> {
        let live = self
            .cluster
            .workload_resources(&spec.target.namespace, &spec.target.workload)
            .await
            .map_err(|e| match e {
                ClusterError::NotFound(_) => {
                    InjectionError::WorkloadNotFound(spec.target.to_string())
                }
                other => InjectionError::Apply(other),
            })?;
        let container = match spec.parameters.container.as_deref() {
            Some(name) => live.containers.iter().find(|c| c.name == name),
            None => live.primary_container(),
        }
        .ok_or_else(|| {
            InjectionError::WorkloadNotFound(format!("{} has no containers", live.workload.name))
        })?;

        self.cluster
            .patch_container_resources(
                &spec.target.namespace,
                &live.workload,
                &container.name,
                &misconfigured_resources(),
            )
            .await
            .map_err(InjectionError::Apply)?;
        Ok(CleanupHandle::RestoreFromBaseline {
            workload: live.workload,
        })
    }

    /// Withdraw a fault
    ///
    /// Reverting an already withdrawn record is a no-op. A failed revert
    /// leaves the record applied and the target reserved.
    pub async fn revert(&self, record: &mut InjectionRecord) -> Result<RevertAck, InjectionError> {
        if !record.is_applied() {
            return Ok(RevertAck::AlreadyReverted);
        }
        let namespace = record.spec.target.namespace.clone();

        let ack = match &record.cleanup {
            CleanupHandle::DeleteResource {
                resource_kind,
                name,
                clear_finalizers_on_stall,
            } => {
                self.delete_chaos(&namespace, resource_kind, name, *clear_finalizers_on_stall)
                    .await?;
                RevertAck::Reverted
            }
            CleanupHandle::RestoreFromBaseline { .. } => RevertAck::DeferredToBaseline,
        };

        record.mark_rolled_back();
        self.active.remove(&(
            record.spec.target.namespace.clone(),
            record.spec.target.workload.clone(),
        ));
        tracing::info!(
            experiment = %record.spec.experiment_id,
            target = %record.spec.target,
            ack = ?ack,
            "fault withdrawn"
        );
        Ok(ack)
    }

    async fn delete_chaos(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
        clear_finalizers_on_stall: bool,
    ) -> Result<(), InjectionError> {
        let deletion = tokio::time::timeout(
            self.delete_timeout,
            self.cluster.delete_resource(namespace, kind, name),
        )
        .await;
        let failure = match deletion {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => ClusterError::Timeout(self.delete_timeout.as_secs()),
        };
        if !clear_finalizers_on_stall || failure.is_unreachable() {
            return Err(InjectionError::Revert(failure));
        }
        tracing::warn!(kind, name, error = %failure, "deletion stalled, clearing finalizers");
        self.cluster
            .clear_finalizers(namespace, kind, name)
            .await
            .map_err(InjectionError::Revert)
    }
}

impl fmt::Debug for FaultInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultInjector")
            .field("active", &self.active.len())
            .field("delete_timeout", &self.delete_timeout)
            .finish_non_exhaustive()
    }
}
