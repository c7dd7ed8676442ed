//! Org billing plan (spec §4.12 "Monthly quota"). Minimal — the tier and
//! the two numbers the quota check needs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgPlan {
    pub tenant_id: String,
    pub tier: PlanTier,
    pub event_quota: u64,
    pub overage_cap_multiplier: f64,
}

impl OrgPlan {
    pub fn free(tenant_id: impl Into<String>, event_quota: u64) -> Self {
        Self { tenant_id: tenant_id.into(), tier: PlanTier::Free, event_quota, overage_cap_multiplier: 2.0 }
    }

    pub fn paid(tenant_id: impl Into<String>, event_quota: u64) -> Self {
        Self { tenant_id: tenant_id.into(), tier: PlanTier::Paid, event_quota, overage_cap_multiplier: 2.0 }
    }
}
