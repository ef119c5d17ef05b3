use crate::domain::Account;

/// Fixed free allowance for accounts without elevated access.
///
/// Evaluate only on a snapshot taken after expiry correction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub allowance: i64,
}

impl QuotaPolicy {
    pub fn new(allowance: i64) -> Self {
        Self { allowance }
    }

    pub fn allow(&self, account: &Account) -> bool {
        account.is_pro || account.usage_count < self.allowance
    }

    /// Messages left before the limit; `None` for elevated access.
    pub fn remaining(&self, account: &Account) -> Option<i64> {
        if account.is_pro {
            return None;
        }
        Some((self.allowance - account.usage_count).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserId;

    fn account(is_pro: bool, usage_count: i64) -> Account {
        Account {
            user_id: UserId(1),
            is_pro,
            usage_count,
            pro_until: None,
            referral_code: "REF1123".to_string(),
        }
    }

    #[test]
    fn free_accounts_allowed_strictly_below_allowance() {
        let q = QuotaPolicy::new(10);
        assert!(q.allow(&account(false, 0)));
        assert!(q.allow(&account(false, 9)));
        assert!(!q.allow(&account(false, 10)));
        assert!(!q.allow(&account(false, 11)));
    }

    #[test]
    fn banked_credit_counts_as_allowance() {
        let q = QuotaPolicy::new(10);
        let a = account(false, -5);
        assert!(q.allow(&a));
        assert_eq!(q.remaining(&a), Some(15));
    }

    #[test]
    fn pro_always_allowed() {
        let q = QuotaPolicy::new(10);
        let a = account(true, 1_000);
        assert!(q.allow(&a));
        assert_eq!(q.remaining(&a), None);
    }

    #[test]
    fn remaining_never_negative() {
        let q = QuotaPolicy::new(10);
        assert_eq!(q.remaining(&account(false, 12)), Some(0));
    }
}
