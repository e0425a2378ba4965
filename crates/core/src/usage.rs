use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user consumption counters against a plan's allowances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLedger {
    pub user_id: String,
    pub active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub token_count: u64,
    pub monthly_token_allowance: u64,
    pub documents_generated: u32,
    pub document_limit: u32,
    pub reset_date: DateTime<Utc>,
}

impl UsageLedger {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    pub fn documents_remaining(&self) -> u32 {
        self.document_limit.saturating_sub(self.documents_generated)
    }

    pub fn tokens_remaining(&self) -> u64 {
        self.monthly_token_allowance.saturating_sub(self.token_count)
    }

    pub fn reset_due(&self, now: DateTime<Utc>) -> bool {
        self.reset_date <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ledger(now: DateTime<Utc>) -> UsageLedger {
        UsageLedger {
            user_id: "u1".to_string(),
            active: true,
            expires_at: Some(now + Duration::days(3)),
            token_count: 9_000,
            monthly_token_allowance: 10_000,
            documents_generated: 4,
            document_limit: 5,
            reset_date: now + Duration::days(10),
        }
    }

    #[test]
    fn remaining_counters_saturate() {
        let now = Utc::now();
        let mut ledger = ledger(now);
        assert_eq!(ledger.documents_remaining(), 1);
        assert_eq!(ledger.tokens_remaining(), 1_000);
        ledger.token_count = 12_000;
        ledger.documents_generated = 7;
        assert_eq!(ledger.documents_remaining(), 0);
        assert_eq!(ledger.tokens_remaining(), 0);
    }

    #[test]
    fn expiry_and_reset() {
        let now = Utc::now();
        let ledger = ledger(now);
        assert!(!ledger.is_expired(now));
        assert!(ledger.is_expired(now + Duration::days(3)));
        assert!(!ledger.reset_due(now));
        assert!(ledger.reset_due(now + Duration::days(11)));
    }
}
