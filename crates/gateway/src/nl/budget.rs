//! Per-sender rate limiting and daily token budgets for the NL path.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;

/// Outcome of the pre-classification checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetCheck {
    Allowed,
    RateLimited,
    BudgetExhausted,
}

#[derive(Default)]
struct SenderUsage {
    day: Option<NaiveDate>,
    tokens_today: u64,
    recent_calls: VecDeque<DateTime<Utc>>,
}

/// Tracks per-sender classifier usage. Limits of zero disable the
/// corresponding check.
#[derive(Default)]
pub struct NlBudget {
    inner: Mutex<HashMap<String, SenderUsage>>,
}

impl NlBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the rate-limit and budget checks, recording the call when
    /// allowed.
    pub fn check(&self, sender: &str, rate_per_minute: u32, daily_tokens: u64) -> BudgetCheck {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let usage = inner.entry(sender.to_owned()).or_default();

        // Roll the daily token counter.
        let today = now.date_naive();
        if usage.day != Some(today) {
            usage.day = Some(today);
            usage.tokens_today = 0;
        }

        if daily_tokens > 0 && usage.tokens_today >= daily_tokens {
            return BudgetCheck::BudgetExhausted;
        }

        if rate_per_minute > 0 {
            let cutoff = now - Duration::minutes(1);
            while usage
                .recent_calls
                .front()
                .is_some_and(|t| *t < cutoff)
            {
                usage.recent_calls.pop_front();
            }
            if usage.recent_calls.len() >= rate_per_minute as usize {
                return BudgetCheck::RateLimited;
            }
            usage.recent_calls.push_back(now);
        }

        BudgetCheck::Allowed
    }

    /// Record tokens spent by a completed classification.
    pub fn record_tokens(&self, sender: &str, tokens: u64) {
        let mut inner = self.inner.lock();
        let usage = inner.entry(sender.to_owned()).or_default();
        let today = Utc::now().date_naive();
        if usage.day != Some(today) {
            usage.day = Some(today);
            usage.tokens_today = 0;
        }
        usage.tokens_today += tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_disable_checks() {
        let budget = NlBudget::new();
        for _ in 0..100 {
            assert_eq!(budget.check("@a:hs", 0, 0), BudgetCheck::Allowed);
        }
    }

    #[test]
    fn rate_limit_trips_after_n_calls() {
        let budget = NlBudget::new();
        for _ in 0..3 {
            assert_eq!(budget.check("@a:hs", 3, 0), BudgetCheck::Allowed);
        }
        assert_eq!(budget.check("@a:hs", 3, 0), BudgetCheck::RateLimited);
        // Other senders are unaffected.
        assert_eq!(budget.check("@b:hs", 3, 0), BudgetCheck::Allowed);
    }

    #[test]
    fn token_budget_exhausts() {
        let budget = NlBudget::new();
        assert_eq!(budget.check("@a:hs", 0, 1000), BudgetCheck::Allowed);
        budget.record_tokens("@a:hs", 1500);
        assert_eq!(budget.check("@a:hs", 0, 1000), BudgetCheck::BudgetExhausted);
        assert_eq!(budget.check("@b:hs", 0, 1000), BudgetCheck::Allowed);
    }

    #[test]
    fn budget_below_limit_still_allowed() {
        let budget = NlBudget::new();
        budget.record_tokens("@a:hs", 400);
        assert_eq!(budget.check("@a:hs", 0, 1000), BudgetCheck::Allowed);
    }
}
