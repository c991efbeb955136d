//! Quota oracle
//!
//! Read-only computation of remaining quota for a slug. This is
//! deliberately kept off the write path: concurrent capture calls consult
//! the oracle without ever contending on a row lock, and the only
//! optimistic answer it gives (`needs_period_start`) is re-checked by the
//! period activator before anyone relies on it.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use hookwell_shared::types::{EPHEMERAL_REQUEST_LIMIT, UNLIMITED};
use hookwell_shared::Plan;

use crate::error::{CaptureError, CaptureResult};

/// Plan attributed to a quota answer. Anonymous endpoints report the
/// synthetic `ephemeral` plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaPlan {
    Free,
    Pro,
    Ephemeral,
}

impl From<Plan> for QuotaPlan {
    fn from(plan: Plan) -> Self {
        match plan {
            Plan::Free => Self::Free,
            Plan::Pro => Self::Pro,
        }
    }
}

/// The oracle's answer. Never persisted or cached here; always recomputed
/// from current endpoint + user state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    pub remaining: i64,
    pub limit: i64,
    pub period_end: Option<i64>,
    pub plan: Option<QuotaPlan>,
    pub needs_period_start: bool,
    pub user_id: Option<Uuid>,
}

/// Endpoint state the snapshot computation needs.
#[derive(Debug, Clone)]
pub struct EndpointQuota {
    pub user_id: Option<Uuid>,
    pub is_ephemeral: bool,
    pub expires_at: Option<i64>,
    pub request_count: i64,
}

/// Owning-user state the snapshot computation needs.
#[derive(Debug, Clone)]
pub struct OwnerQuota {
    pub plan: Plan,
    pub requests_used: i64,
    pub request_limit: i64,
    pub period_end: Option<i64>,
}

/// Compute a quota snapshot from endpoint + (optional) owner state.
///
/// Branch order matters and mirrors how admission is decided:
/// 1. Anonymous endpoints count against the fixed ephemeral cap.
/// 2. Ownerless non-ephemeral endpoints should not occur; they get the same
///    ephemeral-capped treatment rather than unlimited traffic.
/// 3. An owned endpoint whose user row is missing fails open with the
///    unlimited sentinel: a dangling endpoint mid-account-deletion must not
///    block in-flight traffic.
/// 4. A free owner with no live period gets the optimistic full limit and
///    `needs_period_start`; the activator does the real gate.
pub fn snapshot(endpoint: &EndpointQuota, owner: Option<&OwnerQuota>, now: i64) -> QuotaSnapshot {
    if endpoint.user_id.is_none() {
        return QuotaSnapshot {
            remaining: (EPHEMERAL_REQUEST_LIMIT - endpoint.request_count).max(0),
            limit: EPHEMERAL_REQUEST_LIMIT,
            period_end: endpoint.expires_at,
            plan: Some(QuotaPlan::Ephemeral),
            needs_period_start: false,
            user_id: None,
        };
    }

    let Some(owner) = owner else {
        return QuotaSnapshot {
            remaining: UNLIMITED,
            limit: UNLIMITED,
            period_end: None,
            plan: None,
            needs_period_start: false,
            user_id: endpoint.user_id,
        };
    };

    let period_live = matches!(owner.period_end, Some(period_end) if period_end > now);
    if owner.plan == Plan::Free && !period_live {
        return QuotaSnapshot {
            remaining: owner.request_limit,
            limit: owner.request_limit,
            period_end: None,
            plan: Some(QuotaPlan::Free),
            needs_period_start: true,
            user_id: endpoint.user_id,
        };
    }

    QuotaSnapshot {
        remaining: (owner.request_limit - owner.requests_used).max(0),
        limit: owner.request_limit,
        period_end: owner.period_end,
        plan: Some(owner.plan.into()),
        needs_period_start: false,
        user_id: endpoint.user_id,
    }
}

#[derive(Clone)]
pub struct QuotaOracle {
    pool: PgPool,
}

impl QuotaOracle {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve the current quota snapshot for a slug. Pure read.
    pub async fn get_quota(&self, slug: &str, now: i64) -> CaptureResult<QuotaSnapshot> {
        let endpoint: Option<(Option<Uuid>, bool, Option<i64>, i64)> = sqlx::query_as(
            "SELECT user_id, is_ephemeral, expires_at, request_count FROM endpoints WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        let Some((user_id, is_ephemeral, expires_at, request_count)) = endpoint else {
            return Err(CaptureError::NotFound);
        };

        let endpoint = EndpointQuota {
            user_id,
            is_ephemeral,
            expires_at,
            request_count,
        };

        let owner = match user_id {
            None => None,
            Some(user_id) => {
                let row: Option<(String, i64, i64, Option<i64>)> = sqlx::query_as(
                    "SELECT plan, requests_used, request_limit, period_end FROM users WHERE id = $1",
                )
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

                row.map(|(plan, requests_used, request_limit, period_end)| OwnerQuota {
                    plan: plan.parse().unwrap_or_default(),
                    requests_used,
                    request_limit,
                    period_end,
                })
            }
        };

        Ok(snapshot(&endpoint, owner.as_ref(), now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anonymous(request_count: i64) -> EndpointQuota {
        EndpointQuota {
            user_id: None,
            is_ephemeral: true,
            expires_at: Some(10_000),
            request_count,
        }
    }

    fn owned() -> EndpointQuota {
        EndpointQuota {
            user_id: Some(Uuid::new_v4()),
            is_ephemeral: false,
            expires_at: None,
            request_count: 7,
        }
    }

    #[test]
    fn test_anonymous_ephemeral_counts_against_fixed_cap() {
        let snap = snapshot(&anonymous(49), None, 5_000);
        assert_eq!(snap.remaining, 1);
        assert_eq!(snap.limit, EPHEMERAL_REQUEST_LIMIT);
        assert_eq!(snap.period_end, Some(10_000));
        assert_eq!(snap.plan, Some(QuotaPlan::Ephemeral));
        assert!(!snap.needs_period_start);

        let snap = snapshot(&anonymous(50), None, 5_000);
        assert_eq!(snap.remaining, 0);
    }

    #[test]
    fn test_anonymous_over_cap_clamps_to_zero() {
        let snap = snapshot(&anonymous(5_000), None, 5_000);
        assert_eq!(snap.remaining, 0);
    }

    #[test]
    fn test_ownerless_persistent_endpoint_gets_ephemeral_fallback() {
        let endpoint = EndpointQuota {
            user_id: None,
            is_ephemeral: false,
            expires_at: None,
            request_count: 10,
        };
        let snap = snapshot(&endpoint, None, 0);
        assert_eq!(snap.limit, EPHEMERAL_REQUEST_LIMIT);
        assert_eq!(snap.remaining, 40);
    }

    #[test]
    fn test_missing_owner_fails_open_unlimited() {
        let snap = snapshot(&owned(), None, 0);
        assert_eq!(snap.remaining, UNLIMITED);
        assert_eq!(snap.limit, UNLIMITED);
        assert!(snap.user_id.is_some());
        assert!(snap.plan.is_none());
    }

    #[test]
    fn test_free_owner_without_period_is_optimistic() {
        let owner = OwnerQuota {
            plan: Plan::Free,
            requests_used: 150,
            request_limit: 200,
            period_end: None,
        };
        let snap = snapshot(&owned(), Some(&owner), 1_000);
        assert_eq!(snap.remaining, 200);
        assert!(snap.needs_period_start);
        assert_eq!(snap.period_end, None);
    }

    #[test]
    fn test_free_owner_with_expired_period_is_optimistic() {
        let owner = OwnerQuota {
            plan: Plan::Free,
            requests_used: 200,
            request_limit: 200,
            period_end: Some(999),
        };
        let snap = snapshot(&owned(), Some(&owner), 1_000);
        assert!(snap.needs_period_start);
        assert_eq!(snap.remaining, 200);
    }

    #[test]
    fn test_free_owner_with_live_period_reports_real_remaining() {
        let owner = OwnerQuota {
            plan: Plan::Free,
            requests_used: 150,
            request_limit: 200,
            period_end: Some(2_000),
        };
        let snap = snapshot(&owned(), Some(&owner), 1_000);
        assert_eq!(snap.remaining, 50);
        assert!(!snap.needs_period_start);
        assert_eq!(snap.period_end, Some(2_000));
    }

    #[test]
    fn test_owned_ephemeral_endpoint_uses_plan_quota_not_ephemeral_cap() {
        let endpoint = EndpointQuota {
            user_id: Some(Uuid::new_v4()),
            is_ephemeral: true,
            expires_at: Some(99_999),
            request_count: 49,
        };
        let owner = OwnerQuota {
            plan: Plan::Free,
            requests_used: 10,
            request_limit: 200,
            period_end: Some(50_000),
        };
        let snap = snapshot(&endpoint, Some(&owner), 1_000);
        assert_eq!(snap.limit, 200);
        assert_eq!(snap.remaining, 190);
        assert_eq!(snap.plan, Some(QuotaPlan::Free));
    }

    #[test]
    fn test_pro_owner_over_limit_clamps_to_zero() {
        let owner = OwnerQuota {
            plan: Plan::Pro,
            requests_used: 6_000,
            request_limit: 5_000,
            period_end: Some(9_999_999),
        };
        let snap = snapshot(&owned(), Some(&owner), 1_000);
        assert_eq!(snap.remaining, 0);
        assert_eq!(snap.plan, Some(QuotaPlan::Pro));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snap = snapshot(&anonymous(0), None, 0);
        let value = serde_json::to_value(&snap).unwrap();
        assert!(value.get("needsPeriodStart").is_some());
        assert!(value.get("periodEnd").is_some());
    }
}
