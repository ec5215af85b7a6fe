//! Tenant-scoped KPI cache keys.
//!
//! A [`KpiCacheKey`] cannot be built without a tenant, a role class and the
//! filter that produced the summary. Everything that changes the answer is
//! part of the key, so a manager-scoped summary never answers a CEO request.
//!
//! Rendered form: `kpi:{tenant}:{area|*}:{role}:{filterHash}`.

use std::fmt;

use stratix_core::{AreaId, RoleClass, SummaryFilter, TenantId};
use uuid::Uuid;

const PREFIX: &str = "kpi";
const ANY_AREA: &str = "*";

/// Cache key for one KPI summary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KpiCacheKey {
    inner: KeyInner,
}

/// Private inner struct - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyInner {
    tenant_id: TenantId,
    area_id: Option<AreaId>,
    role: RoleClass,
    filter_hash: String,
}

impl KpiCacheKey {
    /// Build the key for `filter` as seen by `role` within `tenant_id`.
    ///
    /// The filter must already be constrained to the requester's scope.
    pub fn new(tenant_id: TenantId, role: RoleClass, filter: &SummaryFilter) -> Self {
        Self {
            inner: KeyInner {
                tenant_id,
                area_id: filter.area_id,
                role,
                filter_hash: filter.filter_hash(),
            },
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.inner.tenant_id
    }

    pub fn area_id(&self) -> Option<AreaId> {
        self.inner.area_id
    }

    pub fn role(&self) -> RoleClass {
        self.inner.role
    }

    pub fn filter_hash(&self) -> &str {
        &self.inner.filter_hash
    }

    /// Whether this key covers the whole tenant rather than one area.
    pub fn is_tenant_wide(&self) -> bool {
        self.inner.area_id.is_none()
    }

    /// Render to the string form used by string-keyed tiers.
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Parse a rendered key. Returns `None` for anything malformed.
    pub fn parse(rendered: &str) -> Option<Self> {
        let mut parts = rendered.split(':');
        if parts.next()? != PREFIX {
            return None;
        }
        let tenant_id = Uuid::parse_str(parts.next()?).ok()?;
        let area_id = match parts.next()? {
            ANY_AREA => None,
            area => Some(Uuid::parse_str(area).ok()?),
        };
        let role = RoleClass::from_db_str(parts.next()?).ok()?;
        let filter_hash = parts.next()?;
        if filter_hash.is_empty() || parts.next().is_some() {
            return None;
        }
        Some(Self {
            inner: KeyInner {
                tenant_id,
                area_id,
                role,
                filter_hash: filter_hash.to_string(),
            },
        })
    }
}

impl fmt::Display for KpiCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", PREFIX, self.inner.tenant_id)?;
        match self.inner.area_id {
            Some(area_id) => write!(f, "{}", area_id)?,
            None => f.write_str(ANY_AREA)?,
        }
        write!(f, ":{}:{}", self.inner.role, self.inner.filter_hash)
    }
}

/// A set of keys dropped together by one invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    /// Every key of the tenant, area-scoped or not.
    Tenant(TenantId),
    /// Keys of the tenant with no area restriction.
    TenantWide(TenantId),
    /// Keys restricted to one area of the tenant.
    Area(TenantId, AreaId),
}

impl KeyPattern {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            KeyPattern::Tenant(tenant_id)
            | KeyPattern::TenantWide(tenant_id)
            | KeyPattern::Area(tenant_id, _) => *tenant_id,
        }
    }

    /// Rendered-key prefix selecting exactly the keys of this pattern.
    pub fn prefix(&self) -> String {
        match self {
            KeyPattern::Tenant(tenant_id) => format!("{}:{}:", PREFIX, tenant_id),
            KeyPattern::TenantWide(tenant_id) => {
                format!("{}:{}:{}:", PREFIX, tenant_id, ANY_AREA)
            }
            KeyPattern::Area(tenant_id, area_id) => {
                format!("{}:{}:{}:", PREFIX, tenant_id, area_id)
            }
        }
    }

    /// Whether `key` belongs to this pattern.
    pub fn matches(&self, key: &KpiCacheKey) -> bool {
        match self {
            KeyPattern::Tenant(tenant_id) => key.tenant_id() == *tenant_id,
            KeyPattern::TenantWide(tenant_id) => {
                key.tenant_id() == *tenant_id && key.is_tenant_wide()
            }
            KeyPattern::Area(tenant_id, area_id) => {
                key.tenant_id() == *tenant_id && key.area_id() == Some(*area_id)
            }
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*", self.prefix())
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<u128>().prop_map(Uuid::from_u128)
    }

    fn arb_role() -> impl Strategy<Value = RoleClass> {
        prop_oneof![
            Just(RoleClass::Ceo),
            Just(RoleClass::Admin),
            Just(RoleClass::Manager),
            Just(RoleClass::Analyst),
        ]
    }

    fn arb_key() -> impl Strategy<Value = KpiCacheKey> {
        (arb_uuid(), proptest::option::of(arb_uuid()), arb_role()).prop_map(
            |(tenant, area, role)| {
                let filter = SummaryFilter {
                    area_id: area,
                    window: None,
                };
                KpiCacheKey::new(tenant, role, &filter)
            },
        )
    }

    fn arb_pattern() -> impl Strategy<Value = KeyPattern> {
        (arb_uuid(), arb_uuid(), 0u8..3).prop_map(|(tenant, area, kind)| match kind {
            0 => KeyPattern::Tenant(tenant),
            1 => KeyPattern::TenantWide(tenant),
            _ => KeyPattern::Area(tenant, area),
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Structural matching and prefix matching always agree, so string
        /// keyed tiers drop exactly what the in-process tier drops.
        #[test]
        fn prop_prefix_agrees_with_matches(key in arb_key(), pattern in arb_pattern()) {
            prop_assert_eq!(
                pattern.matches(&key),
                key.render().starts_with(&pattern.prefix())
            );
        }

        /// A pattern never reaches into another tenant.
        #[test]
        fn prop_pattern_is_tenant_isolated(key in arb_key(), pattern in arb_pattern()) {
            if key.tenant_id() != pattern.tenant_id() {
                prop_assert!(!pattern.matches(&key));
            }
        }

        #[test]
        fn prop_key_contains_its_tenant(key in arb_key()) {
            prop_assert!(KeyPattern::Tenant(key.tenant_id()).matches(&key));
        }
    }
}
