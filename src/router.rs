// 7.0: router. plugins (order book, position request queue) register once with
// governance, then each account opts in per plugin. only an approved plugin may
// move a third-party account's positions.

use crate::access::Role;
use crate::types::{AccountId, Amount, Side, Token, Usd};
use crate::vault::{Vault, VaultError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Router {
    plugins: HashSet<AccountId>,
    // (account, plugin) -> approved
    approvals: HashMap<(AccountId, AccountId), bool>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plugin(
        &mut self,
        vault: &Vault,
        caller: AccountId,
        plugin: AccountId,
    ) -> Result<(), VaultError> {
        vault.require_role(caller, Role::Gov)?;
        self.plugins.insert(plugin);
        Ok(())
    }

    pub fn remove_plugin(
        &mut self,
        vault: &Vault,
        caller: AccountId,
        plugin: AccountId,
    ) -> Result<(), VaultError> {
        vault.require_role(caller, Role::Gov)?;
        self.plugins.remove(&plugin);
        Ok(())
    }

    pub fn approve_plugin(&mut self, account: AccountId, plugin: AccountId) {
        self.approvals.insert((account, plugin), true);
    }

    pub fn deny_plugin(&mut self, account: AccountId, plugin: AccountId) {
        self.approvals.insert((account, plugin), false);
    }

    pub fn is_approved(&self, account: AccountId, plugin: AccountId) -> bool {
        self.plugins.contains(&plugin)
            && self
                .approvals
                .get(&(account, plugin))
                .copied()
                .unwrap_or(false)
    }

    fn validate_plugin(&self, account: AccountId, plugin: AccountId) -> Result<(), VaultError> {
        if !self.plugins.contains(&plugin) {
            return Err(VaultError::PluginNotRegistered(plugin));
        }
        if !self
            .approvals
            .get(&(account, plugin))
            .copied()
            .unwrap_or(false)
        {
            return Err(VaultError::PluginNotApproved { plugin, account });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn plugin_increase_position(
        &self,
        vault: &mut Vault,
        plugin: AccountId,
        account: AccountId,
        collateral_token: Token,
        index_token: Token,
        collateral_amount: Amount,
        size_delta: Usd,
        side: Side,
    ) -> Result<(), VaultError> {
        self.validate_plugin(account, plugin)?;
        vault.increase_position(
            account,
            collateral_token,
            index_token,
            collateral_amount,
            size_delta,
            side,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn plugin_decrease_position(
        &self,
        vault: &mut Vault,
        plugin: AccountId,
        account: AccountId,
        collateral_token: Token,
        index_token: Token,
        collateral_delta: Usd,
        size_delta: Usd,
        side: Side,
        receiver: AccountId,
    ) -> Result<Amount, VaultError> {
        self.validate_plugin(account, plugin)?;
        vault.decrease_position(
            account,
            collateral_token,
            index_token,
            collateral_delta,
            size_delta,
            side,
            receiver,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::{FeeParams, FundingParams};
    use crate::policy::StandardPolicy;
    use crate::price_feed::FixedPrices;
    use crate::vault::VaultParams;

    fn test_vault() -> Vault {
        Vault::new(
            AccountId(1),
            Box::new(FixedPrices::new()),
            Box::new(StandardPolicy),
            VaultParams::default(),
            FeeParams::default(),
            FundingParams::default(),
        )
    }

    #[test]
    fn plugin_registration_is_gov_gated() {
        let vault = test_vault();
        let mut router = Router::new();

        let denied = router.add_plugin(&vault, AccountId(2), AccountId(10));
        assert!(matches!(denied, Err(VaultError::Unauthorized { .. })));

        router.add_plugin(&vault, AccountId(1), AccountId(10)).unwrap();
        assert!(!router.is_approved(AccountId(5), AccountId(10))); // not yet opted in

        router.approve_plugin(AccountId(5), AccountId(10));
        assert!(router.is_approved(AccountId(5), AccountId(10)));

        router.deny_plugin(AccountId(5), AccountId(10));
        assert!(!router.is_approved(AccountId(5), AccountId(10)));
    }

    #[test]
    fn unapproved_plugin_cannot_act() {
        let mut vault = test_vault();
        let mut router = Router::new();
        router.add_plugin(&vault, AccountId(1), AccountId(10)).unwrap();

        let result = router.plugin_increase_position(
            &mut vault,
            AccountId(10),
            AccountId(5),
            Token(1),
            Token(1),
            Amount::zero(),
            Usd::zero(),
            Side::Long,
        );
        assert!(matches!(result, Err(VaultError::PluginNotApproved { .. })));
    }
}
