//! Experiment plans
//!
//! An experiment file holds one experiment per line:
//!
//! ```text
//! # category [target] [key=value ...]
//! cpu-stress
//! network-delay ts-order-service magnitude=3000ms duration=5m
//! pod-config-error ts-auth-service
//! ```
//!
//! Blank lines and `#` comments are skipped. A missing target is drawn from
//! the environment catalog. Without a file, experiments are drawn at random.

use crate::catalog::EnvironmentCatalog;
use crate::config::HarnessConfig;
use crate::error::SpecParseError;
use crate::types::{FailureCategory, FailureSpec, FaultParameters, TargetSelector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Ordered list of experiments for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentPlan {
    specs: Vec<FailureSpec>,
}

impl ExperimentPlan {
    /// Wrap an explicit list
    #[inline]
    #[must_use]
    pub fn new(specs: Vec<FailureSpec>) -> Self {
        Self { specs }
    }

    /// Build the plan a configuration asks for
    ///
    /// Reads `experiment_path` when set, otherwise draws `experiments` random
    /// experiments. Either way at most `experiments` entries are kept.
    pub fn from_config(
        config: &HarnessConfig,
        catalog: &EnvironmentCatalog,
    ) -> Result<Self, SpecParseError> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut plan = match &config.experiment_path {
            Some(path) => Self::load(path, &config.namespace, catalog, &mut rng)?,
            None => Self::random(config.experiments, &config.namespace, catalog, &mut rng)?,
        };
        plan.specs.truncate(config.experiments);
        Ok(plan)
    }

    /// Read an experiment file
    pub fn load<R: Rng + ?Sized>(
        path: &Path,
        namespace: &str,
        catalog: &EnvironmentCatalog,
        rng: &mut R,
    ) -> Result<Self, SpecParseError> {
        let text = std::fs::read_to_string(path).map_err(|source| SpecParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, namespace, catalog, rng)
    }

    /// Parse experiment file contents
    pub fn parse<R: Rng + ?Sized>(
        text: &str,
        namespace: &str,
        catalog: &EnvironmentCatalog,
        rng: &mut R,
    ) -> Result<Self, SpecParseError> {
        let mut specs = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let ordinal = specs.len() + 1;
            specs.push(parse_line(line, index + 1, ordinal, namespace, catalog, rng)?);
        }
        Ok(Self { specs })
    }

    /// Draw random experiments from the catalog
    pub fn random<R: Rng + ?Sized>(
        count: usize,
        namespace: &str,
        catalog: &EnvironmentCatalog,
        rng: &mut R,
    ) -> Result<Self, SpecParseError> {
        let mut specs = Vec::with_capacity(count);
        for ordinal in 1..=count {
            let category = catalog
                .random_category(rng)
                .ok_or_else(|| no_target("any", catalog))?;
            let workload = catalog
                .random_target(category, rng)
                .ok_or_else(|| no_target(category.as_str(), catalog))?;
            specs.push(FailureSpec::new(
                experiment_id(ordinal, category),
                category,
                TargetSelector::new(namespace, workload),
            ));
        }
        Ok(Self { specs })
    }

    /// Number of experiments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the plan is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Experiments in run order
    #[inline]
    #[must_use]
    pub fn specs(&self) -> &[FailureSpec] {
        &self.specs
    }

    /// Consume into the experiment list
    #[inline]
    #[must_use]
    pub fn into_specs(self) -> Vec<FailureSpec> {
        self.specs
    }
}

fn experiment_id(ordinal: usize, category: FailureCategory) -> String {
    format!("exp-{ordinal:03}-{category}")
}

fn no_target(category: &str, catalog: &EnvironmentCatalog) -> SpecParseError {
    SpecParseError::NoTarget {
        category: category.to_string(),
        env: catalog.env_id.clone(),
    }
}

fn parse_line<R: Rng + ?Sized>(
    line: &str,
    line_no: usize,
    ordinal: usize,
    namespace: &str,
    catalog: &EnvironmentCatalog,
    rng: &mut R,
) -> Result<FailureSpec, SpecParseError> {
    let mut tokens = line.split_whitespace();
    let category: FailureCategory = tokens
        .next()
        .ok_or_else(|| SpecParseError::UnknownCategory(String::new()))?
        .parse()?;

    let mut target = None;
    let mut parameters = FaultParameters::default();
    for token in tokens {
        match token.split_once('=') {
            Some(("magnitude", value)) => parameters.magnitude = Some(value.to_string()),
            Some(("duration", value)) => parameters.duration = Some(value.to_string()),
            Some(("container", value)) => parameters.container = Some(value.to_string()),
            Some(_) => {
                return Err(SpecParseError::InvalidParameter {
                    line: line_no,
                    token: token.to_string(),
                })
            }
            None if target.is_none() => target = Some(token.to_string()),
            None => {
                return Err(SpecParseError::UnexpectedToken {
                    line: line_no,
                    token: token.to_string(),
                })
            }
        }
    }

    let workload = match target {
        Some(workload) => workload,
        None => catalog
            .random_target(category, rng)
            .ok_or_else(|| no_target(category.as_str(), catalog))?
            .to_string(),
    };

    Ok(FailureSpec::new(
        experiment_id(ordinal, category),
        category,
        TargetSelector::new(namespace, workload),
    )
    .with_parameters(parameters))
}
