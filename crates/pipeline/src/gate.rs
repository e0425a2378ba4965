use std::sync::Arc;

use chrono::{DateTime, Utc};
use contextdoc_core::{Failure, FailureKind, UsageLedger};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{LedgerStore, StoreError};

/// How the monthly token allowance is enforced.
///
/// Token cost is only known after a run, so neither policy can stop a single
/// run from overshooting the allowance. `Strict` additionally refuses to start
/// new runs once the allowance is used up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPolicy {
    #[default]
    Soft,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStatus {
    pub documents_remaining: u32,
    pub tokens_remaining: u64,
    pub reset_due: bool,
}

#[derive(Error, Debug)]
pub enum UsageError {
    #[error("subscription for {user_id} is inactive or expired")]
    SubscriptionInactive { user_id: String },
    #[error("document limit reached ({used} of {limit})")]
    DocumentLimitReached { used: u32, limit: u32 },
    #[error("monthly token allowance exhausted ({used} of {allowance})")]
    TokenAllowanceExhausted { used: u64, allowance: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl UsageError {
    pub fn failure(&self) -> Failure {
        let kind = match self {
            UsageError::SubscriptionInactive { .. } => FailureKind::SubscriptionInactive,
            UsageError::DocumentLimitReached { .. } => FailureKind::DocumentLimitReached,
            UsageError::TokenAllowanceExhausted { .. } => FailureKind::TokenAllowanceExhausted,
            UsageError::Store(_) => FailureKind::Internal,
        };
        Failure::new(kind, self.to_string())
    }
}

#[derive(Clone)]
pub struct UsageGate {
    ledger: Arc<dyn LedgerStore>,
    policy: TokenPolicy,
}

impl UsageGate {
    pub fn new(ledger: Arc<dyn LedgerStore>, policy: TokenPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    /// Checks the ledger on the blocking pool.
    pub async fn authorize(&self, user_id: &str) -> Result<UsageStatus, UsageError> {
        let gate = self.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || gate.authorize_at(&user_id, Utc::now()))
            .await
            .map_err(StoreError::from)?
    }

    pub fn authorize_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<UsageStatus, UsageError> {
        let ledger = self
            .ledger
            .load(user_id)?
            .ok_or_else(|| UsageError::SubscriptionInactive {
                user_id: user_id.to_string(),
            })?;
        check_ledger(&ledger, self.policy, now)?;
        Ok(UsageStatus {
            documents_remaining: ledger.documents_remaining(),
            tokens_remaining: ledger.tokens_remaining(),
            reset_due: ledger.reset_due(now),
        })
    }

    /// Records one generated document and the tokens it consumed.
    pub async fn charge(&self, user_id: &str, tokens_used: u64) -> Result<UsageLedger, UsageError> {
        let gate = self.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || gate.charge_now(&user_id, tokens_used))
            .await
            .map_err(StoreError::from)?
    }

    fn charge_now(&self, user_id: &str, tokens_used: u64) -> Result<UsageLedger, UsageError> {
        let ledger = self.ledger.increment(user_id, tokens_used, 1)?;
        if ledger.token_count > ledger.monthly_token_allowance {
            tracing::warn!(
                user_id,
                token_count = ledger.token_count,
                allowance = ledger.monthly_token_allowance,
                "token allowance exceeded"
            );
        }
        Ok(ledger)
    }
}

fn check_ledger(ledger: &UsageLedger, policy: TokenPolicy, now: DateTime<Utc>) -> Result<(), UsageError> {
    if !ledger.active || ledger.is_expired(now) {
        return Err(UsageError::SubscriptionInactive {
            user_id: ledger.user_id.clone(),
        });
    }
    if ledger.documents_generated >= ledger.document_limit {
        return Err(UsageError::DocumentLimitReached {
            used: ledger.documents_generated,
            limit: ledger.document_limit,
        });
    }
    if policy == TokenPolicy::Strict && ledger.token_count >= ledger.monthly_token_allowance {
        return Err(UsageError::TokenAllowanceExhausted {
            used: ledger.token_count,
            allowance: ledger.monthly_token_allowance,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn ledger(now: DateTime<Utc>) -> UsageLedger {
        UsageLedger {
            user_id: "u1".to_string(),
            active: true,
            expires_at: None,
            token_count: 0,
            monthly_token_allowance: 1_000,
            documents_generated: 0,
            document_limit: 2,
            reset_date: now + Duration::days(5),
        }
    }

    fn gate_with(ledger: UsageLedger, policy: TokenPolicy) -> (Arc<MemoryStore>, UsageGate) {
        let store = Arc::new(MemoryStore::new());
        store.upsert_ledger(ledger);
        let gate = UsageGate::new(store.clone(), policy);
        (store, gate)
    }

    #[test]
    fn authorizes_active_account() {
        let now = Utc::now();
        let (_, gate) = gate_with(ledger(now), TokenPolicy::Soft);
        let status = gate.authorize_at("u1", now).unwrap();
        assert_eq!(status.documents_remaining, 2);
        assert_eq!(status.tokens_remaining, 1_000);
        assert!(!status.reset_due);
    }

    #[test]
    fn missing_or_inactive_account_is_denied() {
        let now = Utc::now();
        let mut inactive = ledger(now);
        inactive.active = false;
        let (_, gate) = gate_with(inactive, TokenPolicy::Soft);
        assert!(matches!(
            gate.authorize_at("u1", now),
            Err(UsageError::SubscriptionInactive { .. })
        ));
        assert!(matches!(
            gate.authorize_at("nobody", now),
            Err(UsageError::SubscriptionInactive { .. })
        ));
    }

    #[test]
    fn expired_account_is_denied() {
        let now = Utc::now();
        let mut expired = ledger(now);
        expired.expires_at = Some(now - Duration::hours(1));
        let (_, gate) = gate_with(expired, TokenPolicy::Soft);
        let err = gate.authorize_at("u1", now).unwrap_err();
        assert_eq!(err.failure().kind, FailureKind::SubscriptionInactive);
    }

    #[test]
    fn document_limit_is_enforced() {
        let now = Utc::now();
        let mut full = ledger(now);
        full.documents_generated = 2;
        let (_, gate) = gate_with(full, TokenPolicy::Soft);
        let err = gate.authorize_at("u1", now).unwrap_err();
        assert!(matches!(
            err,
            UsageError::DocumentLimitReached { used: 2, limit: 2 }
        ));
    }

    #[test]
    fn token_allowance_only_blocks_under_strict_policy() {
        let now = Utc::now();
        let mut spent = ledger(now);
        spent.token_count = 1_500;
        let (_, soft) = gate_with(spent.clone(), TokenPolicy::Soft);
        assert_eq!(soft.authorize_at("u1", now).unwrap().tokens_remaining, 0);
        let (_, strict) = gate_with(spent, TokenPolicy::Strict);
        assert_eq!(
            strict.authorize_at("u1", now).unwrap_err().failure().kind,
            FailureKind::TokenAllowanceExhausted
        );
    }

    #[tokio::test]
    async fn authorize_reads_ledger_off_the_runtime() {
        let now = Utc::now();
        let (_, gate) = gate_with(ledger(now), TokenPolicy::Soft);
        assert_eq!(gate.authorize("u1").await.unwrap().documents_remaining, 2);
        assert!(gate.authorize("nobody").await.is_err());
    }

    #[tokio::test]
    async fn charge_increments_tokens_and_documents() {
        let now = Utc::now();
        let (store, gate) = gate_with(ledger(now), TokenPolicy::Soft);
        let updated = gate.charge("u1", 1_200).await.unwrap();
        assert_eq!(updated.token_count, 1_200);
        assert_eq!(updated.documents_generated, 1);
        assert_eq!(store.load("u1").unwrap().unwrap(), updated);
    }
}
