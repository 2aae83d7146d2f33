//! Pool-share (LP) token
//!
//! Each pool deploys its own LP token at initialization. The pool is the
//! token's only minter; supply changes are staged into the same ledger
//! transaction as the token movements they pay for.

use crate::errors::PoolError;
use crate::ledger::{LedgerError, LedgerTx, TokenLedger};
use crate::types::Address;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LpToken {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub minter: Address,
}

impl LpToken {
    /// Create a fresh LP token in `ledger`, mintable only by `minter`
    ///
    /// Fails with [`LedgerError::TokenAlreadyRegistered`] when a token with the
    /// same derived address exists, so two pools never share an LP token.
    pub fn deploy(
        ledger: &dyn TokenLedger,
        name: &str,
        symbol: &str,
        minter: Address,
    ) -> Result<Self, LedgerError> {
        let address = Self::derive_address(name, symbol, minter);
        ledger.create_token(address, minter)?;
        info!(lp_token = %address, %minter, lp_name = name, lp_symbol = symbol, "LP token deployed");
        Ok(Self {
            address,
            name: name.to_string(),
            symbol: symbol.to_string(),
            minter,
        })
    }

    /// Address of the token `deploy` would create for these parameters
    pub fn derive_address(name: &str, symbol: &str, minter: Address) -> Address {
        Address::derive(&[
            b"lp-token".as_slice(),
            name.as_bytes(),
            symbol.as_bytes(),
            minter.as_bytes(),
        ])
    }

    /// Re-attach an already deployed token to a ledger
    pub fn attach(&self, ledger: &dyn TokenLedger) -> Result<(), LedgerError> {
        ledger.register_token(self.address, self.minter)
    }

    pub fn total_supply(&self, ledger: &dyn TokenLedger) -> u128 {
        ledger.total_supply(&self.address)
    }

    pub fn balance_of(&self, ledger: &dyn TokenLedger, holder: &Address) -> u128 {
        ledger.balance_of(&self.address, holder)
    }

    pub(crate) fn stage_mint(
        &self,
        tx: &mut LedgerTx,
        to: Address,
        amount: u128,
    ) -> Result<(), PoolError> {
        if amount == 0 {
            return Err(PoolError::CannotMintZero);
        }
        tx.mint(self.address, self.minter, to, amount);
        Ok(())
    }

    pub(crate) fn stage_burn(&self, tx: &mut LedgerTx, from: Address, amount: u128) {
        tx.burn(self.address, self.minter, from, amount);
    }
}
