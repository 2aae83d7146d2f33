//! Token custody
//!
//! Pools never move tokens directly. Each operation stages its transfers,
//! mints and burns into a [`LedgerTx`] and hands the whole transaction to
//! [`TokenLedger::settle`], which applies all of it or none of it. Ops are
//! validated in order, so a later op may spend what an earlier op credited.

use crate::types::Address;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient {token} balance for {holder}: needed {needed}, available {available}")]
    InsufficientBalance {
        token: Address,
        holder: Address,
        needed: u128,
        available: u128,
    },

    #[error("{minter} is not the minter of token {token}")]
    UnauthorizedMinter { token: Address, minter: Address },

    #[error("Token {0} is already registered")]
    TokenAlreadyRegistered(Address),

    #[error("Token {0} can only be issued by its minter")]
    ManagedToken(Address),

    #[error("Supply overflow for token {0}")]
    Overflow(Address),
}

/// Single staged ledger movement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    Transfer {
        token: Address,
        from: Address,
        to: Address,
        amount: u128,
    },
    Mint {
        token: Address,
        minter: Address,
        to: Address,
        amount: u128,
    },
    Burn {
        token: Address,
        minter: Address,
        from: Address,
        amount: u128,
    },
}

/// Ordered batch of ledger movements, applied atomically by `settle`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerTx {
    ops: Vec<LedgerOp>,
}

impl LedgerTx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero-amount transfers are dropped
    pub fn transfer(&mut self, token: Address, from: Address, to: Address, amount: u128) {
        if amount > 0 {
            self.ops.push(LedgerOp::Transfer {
                token,
                from,
                to,
                amount,
            });
        }
    }

    pub fn mint(&mut self, token: Address, minter: Address, to: Address, amount: u128) {
        self.ops.push(LedgerOp::Mint {
            token,
            minter,
            to,
            amount,
        });
    }

    pub fn burn(&mut self, token: Address, minter: Address, from: Address, amount: u128) {
        self.ops.push(LedgerOp::Burn {
            token,
            minter,
            from,
            amount,
        });
    }

    pub fn ops(&self) -> &[LedgerOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Total `(credited, debited)` to `holder` in `token` across the staged ops
    pub fn flows(&self, token: &Address, holder: &Address) -> (u128, u128) {
        let mut credited: u128 = 0;
        let mut debited: u128 = 0;
        for op in &self.ops {
            match op {
                LedgerOp::Transfer {
                    token: t,
                    from,
                    to,
                    amount,
                } if t == token => {
                    if to == holder {
                        credited = credited.saturating_add(*amount);
                    }
                    if from == holder {
                        debited = debited.saturating_add(*amount);
                    }
                }
                LedgerOp::Mint {
                    token: t,
                    to,
                    amount,
                    ..
                } if t == token && to == holder => {
                    credited = credited.saturating_add(*amount);
                }
                LedgerOp::Burn {
                    token: t,
                    from,
                    amount,
                    ..
                } if t == token && from == holder => {
                    debited = debited.saturating_add(*amount);
                }
                _ => {}
            }
        }
        (credited, debited)
    }

    /// Balance `holder` would have once this transaction settled
    pub fn projected_balance(
        &self,
        ledger: &dyn TokenLedger,
        token: &Address,
        holder: &Address,
    ) -> u128 {
        let (credited, debited) = self.flows(token, holder);
        ledger
            .balance_of(token, holder)
            .saturating_add(credited)
            .saturating_sub(debited)
    }
}

/// Custody of every token a pool touches, including its own LP token
pub trait TokenLedger: Send + Sync {
    fn balance_of(&self, token: &Address, holder: &Address) -> u128;

    fn total_supply(&self, token: &Address) -> u128;

    /// Introduce a new managed `token`; fails if the address is already in use
    fn create_token(&self, token: Address, minter: Address) -> Result<(), LedgerError>;

    /// Make `minter` the only account able to mint and burn `token`
    ///
    /// Registering the same pair twice is a no-op.
    fn register_token(&self, token: Address, minter: Address) -> Result<(), LedgerError>;

    /// Apply every op of `tx` or none of them
    fn settle(&self, tx: LedgerTx) -> Result<(), LedgerError>;
}

#[derive(Debug, Default)]
struct Book {
    balances: HashMap<(Address, Address), u128>,
    supplies: HashMap<Address, u128>,
    minters: HashMap<Address, Address>,
}

/// Writes of one transaction, layered over the committed book
struct Overlay<'a> {
    book: &'a Book,
    balances: HashMap<(Address, Address), u128>,
    supplies: HashMap<Address, u128>,
}

impl<'a> Overlay<'a> {
    fn new(book: &'a Book) -> Self {
        Self {
            book,
            balances: HashMap::new(),
            supplies: HashMap::new(),
        }
    }

    fn balance(&self, token: Address, holder: Address) -> u128 {
        self.balances
            .get(&(token, holder))
            .or_else(|| self.book.balances.get(&(token, holder)))
            .copied()
            .unwrap_or(0)
    }

    fn supply(&self, token: Address) -> u128 {
        self.supplies
            .get(&token)
            .or_else(|| self.book.supplies.get(&token))
            .copied()
            .unwrap_or(0)
    }

    fn debit(&mut self, token: Address, holder: Address, amount: u128) -> Result<(), LedgerError> {
        let available = self.balance(token, holder);
        let remaining = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                token,
                holder,
                needed: amount,
                available,
            })?;
        self.balances.insert((token, holder), remaining);
        Ok(())
    }

    fn credit(&mut self, token: Address, holder: Address, amount: u128) -> Result<(), LedgerError> {
        let balance = self
            .balance(token, holder)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(token))?;
        self.balances.insert((token, holder), balance);
        Ok(())
    }

    fn check_minter(&self, token: Address, minter: Address) -> Result<(), LedgerError> {
        match self.book.minters.get(&token) {
            Some(registered) if *registered == minter => Ok(()),
            _ => Err(LedgerError::UnauthorizedMinter { token, minter }),
        }
    }

    fn apply(&mut self, op: &LedgerOp) -> Result<(), LedgerError> {
        match *op {
            LedgerOp::Transfer {
                token,
                from,
                to,
                amount,
            } => {
                self.debit(token, from, amount)?;
                self.credit(token, to, amount)
            }
            LedgerOp::Mint {
                token,
                minter,
                to,
                amount,
            } => {
                self.check_minter(token, minter)?;
                let supply = self
                    .supply(token)
                    .checked_add(amount)
                    .ok_or(LedgerError::Overflow(token))?;
                self.supplies.insert(token, supply);
                self.credit(token, to, amount)
            }
            LedgerOp::Burn {
                token,
                minter,
                from,
                amount,
            } => {
                self.check_minter(token, minter)?;
                self.debit(token, from, amount)?;
                let supply = self.supply(token).saturating_sub(amount);
                self.supplies.insert(token, supply);
                Ok(())
            }
        }
    }
}

/// Process-local [`TokenLedger`]
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    book: RwLock<Book>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue `amount` of an unmanaged token to `holder`
    ///
    /// Tokens registered with a minter can only be issued through `settle`.
    pub fn credit(&self, token: Address, holder: Address, amount: u128) -> Result<(), LedgerError> {
        let mut book = self.book.write();
        if book.minters.contains_key(&token) {
            return Err(LedgerError::ManagedToken(token));
        }
        let mut overlay = Overlay::new(&book);
        overlay.credit(token, holder, amount)?;
        let supply = overlay
            .supply(token)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(token))?;
        overlay.supplies.insert(token, supply);
        let Overlay {
            balances, supplies, ..
        } = overlay;
        book.balances.extend(balances);
        book.supplies.extend(supplies);
        Ok(())
    }
}

impl TokenLedger for InMemoryLedger {
    fn balance_of(&self, token: &Address, holder: &Address) -> u128 {
        self.book
            .read()
            .balances
            .get(&(*token, *holder))
            .copied()
            .unwrap_or(0)
    }

    fn total_supply(&self, token: &Address) -> u128 {
        self.book.read().supplies.get(token).copied().unwrap_or(0)
    }

    fn create_token(&self, token: Address, minter: Address) -> Result<(), LedgerError> {
        let mut book = self.book.write();
        if book.minters.contains_key(&token) || book.supplies.contains_key(&token) {
            return Err(LedgerError::TokenAlreadyRegistered(token));
        }
        book.minters.insert(token, minter);
        Ok(())
    }

    fn register_token(&self, token: Address, minter: Address) -> Result<(), LedgerError> {
        let mut book = self.book.write();
        match book.minters.get(&token) {
            Some(existing) if *existing == minter => Ok(()),
            Some(_) => Err(LedgerError::TokenAlreadyRegistered(token)),
            None if book.supplies.contains_key(&token) => {
                Err(LedgerError::TokenAlreadyRegistered(token))
            }
            None => {
                book.minters.insert(token, minter);
                Ok(())
            }
        }
    }

    fn settle(&self, tx: LedgerTx) -> Result<(), LedgerError> {
        let mut book = self.book.write();
        let mut overlay = Overlay::new(&book);
        for op in tx.ops() {
            overlay.apply(op)?;
        }
        let Overlay {
            balances, supplies, ..
        } = overlay;
        book.balances.extend(balances);
        book.supplies.extend(supplies);
        debug!(ops = tx.len(), "ledger transaction settled");
        Ok(())
    }
}
