// 10.0: capability-set access control. roles are granted per account and
// checked at each privileged entry point. no ambient owner/admin globals.

use crate::types::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    // parameter changes, token listing, policy swaps, fee withdrawal
    Gov,
    // batch execution of delayed position requests
    Keeper,
    // liquidation calls while private liquidation mode is on
    Liquidator,
    // liquidity mint/redeem while manager mode is on
    Manager,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessControl {
    grants: HashMap<AccountId, HashSet<Role>>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bootstrap helper: a fresh controller with `gov` holding the Gov role.
    pub fn with_gov(gov: AccountId) -> Self {
        let mut ac = Self::new();
        ac.grants.entry(gov).or_default().insert(Role::Gov);
        ac
    }

    pub fn grant(&mut self, account: AccountId, role: Role) {
        if account.is_zero() {
            return; // the sentinel can never act
        }
        self.grants.entry(account).or_default().insert(role);
    }

    pub fn revoke(&mut self, account: AccountId, role: Role) {
        if let Some(roles) = self.grants.get_mut(&account) {
            roles.remove(&role);
        }
    }

    pub fn has(&self, account: AccountId, role: Role) -> bool {
        self.grants
            .get(&account)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_and_revoke() {
        let mut ac = AccessControl::with_gov(AccountId(1));
        assert!(ac.has(AccountId(1), Role::Gov));
        assert!(!ac.has(AccountId(1), Role::Keeper));

        ac.grant(AccountId(2), Role::Keeper);
        assert!(ac.has(AccountId(2), Role::Keeper));

        ac.revoke(AccountId(2), Role::Keeper);
        assert!(!ac.has(AccountId(2), Role::Keeper));
    }

    #[test]
    fn zero_account_never_granted() {
        let mut ac = AccessControl::new();
        ac.grant(AccountId::ZERO, Role::Gov);
        assert!(!ac.has(AccountId::ZERO, Role::Gov));
    }
}
