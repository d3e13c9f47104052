//! Environment catalogs
//!
//! Each known environment lists the fault categories it supports and the
//! workloads a fault may be aimed at.

use crate::types::FailureCategory;
use rand::seq::SliceRandom;
use rand::Rng;

const TRAIN_TICKET_SERVICES: &[&str] = &[
    "ts-admin-basic-info-service",
    "ts-admin-order-service",
    "ts-admin-route-service",
    "ts-admin-travel-service",
    "ts-admin-user-service",
    "ts-assurance-service",
    "ts-auth-service",
    "ts-avatar-service",
    "ts-basic-service",
    "ts-cancel-service",
    "ts-config-service",
    "ts-consign-price-service",
    "ts-consign-service",
    "ts-contacts-service",
    "ts-delivery-service",
    "ts-execute-service",
    "ts-food-delivery-service",
    "ts-food-service",
    "ts-gateway-service",
    "ts-inside-payment-service",
    "ts-news-service",
    "ts-notification-service",
    "ts-order-other-service",
    "ts-order-service",
    "ts-payment-service",
    "ts-preserve-other-service",
    "ts-preserve-service",
    "ts-price-service",
    "ts-rebook-service",
    "ts-route-plan-service",
    "ts-route-service",
    "ts-seat-service",
    "ts-security-service",
    "ts-station-food-service",
    "ts-station-service",
    "ts-ticket-office-service",
    "ts-train-food-service",
    "ts-train-service",
    "ts-travel-plan-service",
    "ts-travel-service",
    "ts-travel2-service",
    "ts-ui-dashboard",
    "ts-user-service",
    "ts-verification-code-service",
    "ts-voucher-service",
    "ts-wait-order-service",
];

const TRAIN_TICKET_DISK_IO: &[&str] = &["nacosdb-mysql"];

const BOUTIQUE_STATELESS: &[&str] = &[
    "adservice",
    "cartservice",
    "checkoutservice",
    "currencyservice",
    "emailservice",
    "frontend",
    "loadgenerator",
    "paymentservice",
    "productcatalogservice",
    "recommendationservice",
    "shippingservice",
];

const SIMPLE_MICRO_SERVICES: &[&str] = &["hello-service", "time-service"];

/// Fault categories and candidate targets of one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentCatalog {
    /// Environment identifier
    pub env_id: String,
    /// Supported fault categories
    pub categories: Vec<FailureCategory>,
    /// Candidate targets for most categories
    pub workloads: Vec<String>,
    /// Candidate targets for disk faults
    pub disk_io_targets: Vec<String>,
}

impl EnvironmentCatalog {
    /// Build a catalog from explicit lists
    #[must_use]
    pub fn new(env_id: impl Into<String>, workloads: &[&str], disk_io_targets: &[&str]) -> Self {
        Self {
            env_id: env_id.into(),
            categories: FailureCategory::ALL.to_vec(),
            workloads: workloads.iter().map(ToString::to_string).collect(),
            disk_io_targets: disk_io_targets.iter().map(ToString::to_string).collect(),
        }
    }

    /// Built-in catalog of a known environment
    #[must_use]
    pub fn for_env(env_id: &str) -> Option<Self> {
        match env_id {
            "train-ticket" => Some(Self::new(
                env_id,
                TRAIN_TICKET_SERVICES,
                TRAIN_TICKET_DISK_IO,
            )),
            "online-boutique" => {
                let mut workloads = BOUTIQUE_STATELESS.to_vec();
                workloads.push("redis-cart");
                workloads.sort_unstable();
                Some(Self::new(env_id, &workloads, BOUTIQUE_STATELESS))
            }
            "simple-micro" => Some(Self::new(
                env_id,
                SIMPLE_MICRO_SERVICES,
                SIMPLE_MICRO_SERVICES,
            )),
            _ => None,
        }
    }

    /// Candidate targets for a category
    #[must_use]
    pub fn targets_for(&self, category: FailureCategory) -> &[String] {
        match category {
            FailureCategory::DiskIo => &self.disk_io_targets,
            _ => &self.workloads,
        }
    }

    /// Pick a random supported category
    pub fn random_category<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<FailureCategory> {
        self.categories.choose(rng).copied()
    }

    /// Pick a random target for a category
    pub fn random_target<R: Rng + ?Sized>(
        &self,
        category: FailureCategory,
        rng: &mut R,
    ) -> Option<&str> {
        self.targets_for(category).choose(rng).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn train_ticket_targets_disk_faults_at_the_database() {
        let catalog = EnvironmentCatalog::for_env("train-ticket").unwrap();
        assert_eq!(catalog.workloads.len(), 46);
        assert_eq!(
            catalog.targets_for(FailureCategory::DiskIo),
            &["nacosdb-mysql".to_string()]
        );
        assert!(catalog
            .targets_for(FailureCategory::CpuStress)
            .iter()
            .all(|w| w.starts_with("ts-")));
    }

    #[test]
    fn boutique_keeps_cart_cache_out_of_disk_faults() {
        let catalog = EnvironmentCatalog::for_env("online-boutique").unwrap();
        assert!(catalog.workloads.iter().any(|w| w == "redis-cart"));
        assert!(!catalog.disk_io_targets.iter().any(|w| w == "redis-cart"));
    }

    #[test]
    fn unknown_environment_has_no_catalog() {
        assert!(EnvironmentCatalog::for_env("moon-base").is_none());
    }

    #[test]
    fn seeded_picks_are_reproducible() {
        let catalog = EnvironmentCatalog::for_env("train-ticket").unwrap();
        let pick = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let category = catalog.random_category(&mut rng).unwrap();
            let target = catalog.random_target(category, &mut rng).unwrap().to_string();
            (category, target)
        };
        assert_eq!(pick(7), pick(7));
    }
}
