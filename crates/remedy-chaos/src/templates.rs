//! Fault templates
//!
//! Chaos resources are rendered from YAML templates with `[placeholder]`
//! substitution. Built-in templates cover every chaos-backed category; a
//! template directory may override any of them with `<category>.yaml`.

use crate::error::InjectionError;
use remedy_core::{FailureCategory, FailureSpec};
use std::collections::HashMap;
use std::path::Path;

const STRESS_CPU: &str = r"apiVersion: chaos-mesh.org/v1alpha1
kind: StressChaos
metadata:
  name: [fault_name]
  namespace: [target_namespace]
spec:
  mode: all
  selector:
    namespaces:
      - [target_namespace]
    labelSelectors:
      app: [target_pod]
  stressors:
    cpu:
      workers: [magnitude]
      load: 100
  duration: [duration]
";

const STRESS_MEMORY: &str = r"apiVersion: chaos-mesh.org/v1alpha1
kind: StressChaos
metadata:
  name: [fault_name]
  namespace: [target_namespace]
spec:
  mode: all
  selector:
    namespaces:
      - [target_namespace]
    labelSelectors:
      app: [target_pod]
  stressors:
    memory:
      workers: 4
      size: [magnitude]
  duration: [duration]
";

const IO_LATENCY: &str = r"apiVersion: chaos-mesh.org/v1alpha1
kind: IOChaos
metadata:
  name: [fault_name]
  namespace: [target_namespace]
spec:
  action: latency
  mode: all
  selector:
    namespaces:
      - [target_namespace]
    labelSelectors:
      app: [target_pod]
  volumePath: /var/log/mysql
  path: /var/log/mysql/**/*
  delay: [magnitude]
  percent: 100
  duration: [duration]
";

const NETWORK_LOSS: &str = r"apiVersion: chaos-mesh.org/v1alpha1
kind: NetworkChaos
metadata:
  name: [fault_name]
  namespace: [target_namespace]
spec:
  action: loss
  mode: all
  selector:
    namespaces:
      - [target_namespace]
    labelSelectors:
      app: [target_pod]
  loss:
    loss: '[magnitude]'
    correlation: '0'
  direction: to
  duration: [duration]
";

const NETWORK_DELAY: &str = r"apiVersion: chaos-mesh.org/v1alpha1
kind: NetworkChaos
metadata:
  name: [fault_name]
  namespace: [target_namespace]
spec:
  action: delay
  mode: all
  selector:
    namespaces:
      - [target_namespace]
    labelSelectors:
      app: [target_pod]
  delay:
    latency: [magnitude]
    correlation: '0'
    jitter: 0ms
  direction: to
  duration: [duration]
";

const POD_FAILURE: &str = r"apiVersion: chaos-mesh.org/v1alpha1
kind: PodChaos
metadata:
  name: [fault_name]
  namespace: [target_namespace]
spec:
  action: pod-failure
  mode: all
  selector:
    namespaces:
      - [target_namespace]
    labelSelectors:
      app: [target_pod]
  duration: [duration]
";

const DEFAULT_DURATION: &str = "30m";

/// Magnitude used when an experiment does not set one
#[must_use]
pub fn default_magnitude(category: FailureCategory) -> &'static str {
    match category {
        FailureCategory::CpuStress => "2",
        FailureCategory::MemoryStress => "512MB",
        FailureCategory::DiskIo => "500ms",
        FailureCategory::NetworkLoss => "100",
        FailureCategory::NetworkDelay => "2000ms",
        FailureCategory::PodFail | FailureCategory::PodConfigError => "",
    }
}

/// A chaos resource ready to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFault {
    /// Resource kind read back from the rendered document
    pub kind: String,
    /// Resource name read back from the rendered document
    pub name: String,
    /// Rendered YAML
    pub manifest: String,
}

/// Template registry
#[derive(Debug, Clone, Default)]
pub struct FaultTemplates {
    overrides: HashMap<FailureCategory, String>,
}

impl FaultTemplates {
    /// Built-in templates only
    #[must_use]
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Built-in templates overridden by `<dir>/<category>.yaml` where present
    pub fn from_dir(dir: &Path) -> Result<Self, InjectionError> {
        let mut overrides = HashMap::new();
        for category in FailureCategory::ALL {
            let path = dir.join(format!("{category}.yaml"));
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .map_err(|e| InjectionError::Template(format!("{}: {e}", path.display())))?;
            tracing::debug!(category = %category, path = %path.display(), "template override loaded");
            overrides.insert(category, text);
        }
        Ok(Self { overrides })
    }

    /// Override one category's template
    #[must_use]
    pub fn with_override(mut self, category: FailureCategory, template: impl Into<String>) -> Self {
        self.overrides.insert(category, template.into());
        self
    }

    fn template(&self, category: FailureCategory) -> Option<&str> {
        if let Some(custom) = self.overrides.get(&category) {
            return Some(custom);
        }
        match category {
            FailureCategory::CpuStress => Some(STRESS_CPU),
            FailureCategory::MemoryStress => Some(STRESS_MEMORY),
            FailureCategory::DiskIo => Some(IO_LATENCY),
            FailureCategory::NetworkLoss => Some(NETWORK_LOSS),
            FailureCategory::NetworkDelay => Some(NETWORK_DELAY),
            FailureCategory::PodFail => Some(POD_FAILURE),
            FailureCategory::PodConfigError => None,
        }
    }

    /// Render the chaos resource for an experiment
    pub fn render(&self, spec: &FailureSpec) -> Result<RenderedFault, InjectionError> {
        let template = self.template(spec.category).ok_or_else(|| {
            InjectionError::Template(format!("no chaos template for {}", spec.category))
        })?;
        let fault_name = format!("{}-{}", spec.category, spec.target.workload);
        let magnitude = spec
            .parameters
            .magnitude
            .as_deref()
            .unwrap_or_else(|| default_magnitude(spec.category));
        let duration = spec
            .parameters
            .duration
            .as_deref()
            .unwrap_or(DEFAULT_DURATION);

        let manifest = template
            .replace("[fault_name]", &fault_name)
            .replace("[target_pod]", &spec.target.workload)
            .replace("[target_namespace]", &spec.target.namespace)
            .replace("[magnitude]", magnitude)
            .replace("[duration]", duration);

        let doc: serde_yaml::Value = serde_yaml::from_str(&manifest)
            .map_err(|e| InjectionError::Template(format!("{}: {e}", spec.category)))?;
        let kind = doc
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .ok_or_else(|| InjectionError::Template("rendered fault has no kind".into()))?
            .to_string();
        let name = doc
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(serde_yaml::Value::as_str)
            .ok_or_else(|| InjectionError::Template("rendered fault has no name".into()))?
            .to_string();

        Ok(RenderedFault {
            kind,
            name,
            manifest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use remedy_core::{FaultParameters, TargetSelector};

    fn spec(category: FailureCategory) -> FailureSpec {
        FailureSpec::new("exp", category, TargetSelector::new("tt", "ts-order-service"))
    }

    #[test]
    fn renders_every_chaos_backed_category() {
        let templates = FaultTemplates::builtin();
        for category in FailureCategory::ALL {
            let rendered = templates.render(&spec(category));
            if category.uses_chaos_resource() {
                let rendered = rendered.unwrap();
                assert_eq!(rendered.name, format!("{category}-ts-order-service"));
                assert!(!rendered.manifest.contains('['), "{category} left a placeholder");
                assert!(rendered.manifest.contains("namespace: tt"));
            } else {
                assert!(rendered.is_err());
            }
        }
    }

    #[test]
    fn reads_kind_from_the_document() {
        let templates = FaultTemplates::builtin();
        assert_eq!(
            templates.render(&spec(FailureCategory::DiskIo)).unwrap().kind,
            "IOChaos"
        );
        assert_eq!(
            templates.render(&spec(FailureCategory::PodFail)).unwrap().kind,
            "PodChaos"
        );
    }

    #[test]
    fn parameters_replace_defaults() {
        let spec = spec(FailureCategory::NetworkDelay).with_parameters(FaultParameters {
            magnitude: Some("3000ms".into()),
            duration: Some("5m".into()),
            container: None,
        });
        let rendered = FaultTemplates::builtin().render(&spec).unwrap();
        assert!(rendered.manifest.contains("latency: 3000ms"));
        assert!(rendered.manifest.contains("duration: 5m"));
    }

    #[test]
    fn directory_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cpu-stress.yaml"),
            "kind: StressChaos\nmetadata:\n  name: custom-[target_pod]\n",
        )
        .unwrap();
        let templates = FaultTemplates::from_dir(dir.path()).unwrap();
        let rendered = templates.render(&spec(FailureCategory::CpuStress)).unwrap();
        assert_eq!(rendered.name, "custom-ts-order-service");
        assert!(templates.render(&spec(FailureCategory::MemoryStress)).is_ok());
    }
}
