//! Licensing-tier quota on active (non-404) redirect rules.

use serde::Serialize;

/// Maximum number of non-404 rules the Lite edition may hold.
pub const LITE_REDIRECT_LIMIT: i64 = 3;

/// Product handle of the standalone redirects product.
pub const PRODUCT_REDIRECTS: &str = "redirects";
/// Product handle of the SEO bundle, which also unlocks redirects.
pub const PRODUCT_SEO: &str = "seo";

/// License edition of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    Lite,
    Pro,
}

/// Host-provided license lookup.
pub trait EditionLookup: Send + Sync {
    fn is_edition(&self, product: &str, edition: Edition) -> bool;
}

/// Room left under the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capacity {
    Unlimited,
    Limited(i64),
}

/// Pure quota gate. Holds the tier only; counts are passed in by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    unlimited: bool,
}

impl QuotaPolicy {
    pub fn unlimited() -> Self {
        Self { unlimited: true }
    }

    pub fn restricted() -> Self {
        Self { unlimited: false }
    }

    /// Unlimited if either the redirects or the SEO product is licensed Pro.
    pub fn from_lookup(lookup: &dyn EditionLookup) -> Self {
        Self {
            unlimited: lookup.is_edition(PRODUCT_REDIRECTS, Edition::Pro)
                || lookup.is_edition(PRODUCT_SEO, Edition::Pro),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.unlimited
    }

    /// Whether one more non-404 rule may be added to `existing_non_404`.
    pub fn can_create(&self, existing_non_404: i64) -> bool {
        self.admits(existing_non_404 + 1)
    }

    /// Whether a state in which `projected_non_404` rules exist is allowed.
    pub fn admits(&self, projected_non_404: i64) -> bool {
        self.unlimited || projected_non_404 <= LITE_REDIRECT_LIMIT
    }

    pub fn remaining_capacity(&self, existing_non_404: i64) -> Capacity {
        if self.unlimited {
            Capacity::Unlimited
        } else {
            Capacity::Limited((LITE_REDIRECT_LIMIT - existing_non_404).max(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Licensed(&'static [&'static str]);

    impl EditionLookup for Licensed {
        fn is_edition(&self, product: &str, edition: Edition) -> bool {
            (edition == Edition::Pro) == self.0.contains(&product)
        }
    }

    #[test]
    fn restricted_allows_up_to_limit() {
        let q = QuotaPolicy::restricted();
        assert!(q.can_create(0));
        assert!(q.can_create(2));
        assert!(!q.can_create(3));
        assert!(!q.can_create(10));
    }

    #[test]
    fn unlimited_always_admits() {
        let q = QuotaPolicy::unlimited();
        assert!(q.can_create(1_000));
        assert_eq!(q.remaining_capacity(1_000), Capacity::Unlimited);
    }

    #[test]
    fn remaining_capacity_never_negative() {
        let q = QuotaPolicy::restricted();
        assert_eq!(q.remaining_capacity(1), Capacity::Limited(2));
        assert_eq!(q.remaining_capacity(5), Capacity::Limited(0));
    }

    #[test]
    fn either_pro_product_unlocks() {
        assert!(QuotaPolicy::from_lookup(&Licensed(&[PRODUCT_SEO])).is_unlimited());
        assert!(QuotaPolicy::from_lookup(&Licensed(&[PRODUCT_REDIRECTS])).is_unlimited());
        assert!(!QuotaPolicy::from_lookup(&Licensed(&[])).is_unlimited());
    }
}
