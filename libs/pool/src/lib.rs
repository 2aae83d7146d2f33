//! # StableSwap Pool - Accounting, Meta Pools and Registry
//!
//! ## Purpose
//!
//! Stateful StableSwap pools built on the stateless numerics of
//! `stableswap-math`: token swaps, balanced and imbalanced deposits, three
//! withdrawal flavours, admin fees, amplification ramps, flash loans, meta
//! pools layered on a base pool's LP token, and a registry that persists pool
//! snapshots.
//!
//! ## Integration Points
//!
//! - **Custody**: every token movement goes through a [`TokenLedger`] as one
//!   atomic [`LedgerTx`]; [`InMemoryLedger`] is the bundled implementation
//! - **Time**: deadlines, ramps and the base price cache read a [`Clock`]
//! - **Events**: committed operations publish [`PoolEvent`]s to an
//!   [`EventSink`], e.g. a `crossbeam_channel::Sender`
//! - **Configuration**: [`PoolEnv::from_config`] and
//!   [`PoolRegistry::from_config`] consume `stableswap-config`
//!
//! ## Architecture Role
//!
//! ```text
//! caller ──► StableSwapPool / MetaPool (Guarded<_>, one lock per pool)
//!                    │
//!                    ▼
//!              Swap / MetaSwap ──► stableswap-math (get_d, get_y, ramp)
//!                    │
//!         stage LedgerTx + buffer PoolEvents
//!                    │
//!        TokenLedger::settle ──ok──► EventSink
//!                    └──err──► restore saved PoolState
//! ```
//!
//! A failed operation leaves pool state, ledger balances and the event stream
//! untouched. Nested calls into a pool from inside one of its own operations
//! (for instance from a flash loan receiver) fail with
//! [`PoolError::ReentrantCall`].

pub mod admin;
pub mod clock;
pub mod errors;
pub mod events;
pub mod flash_loan;
pub mod guard;
pub mod handle;
pub mod ledger;
pub mod lp_token;
pub mod meta;
pub mod registry;
pub mod state;
pub mod swap;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::PoolError;
pub use events::{DiscardEvents, EventSink, PoolEvent};
pub use flash_loan::{FlashLoanReceiver, FlashLoanTerms};
pub use guard::Guarded;
pub use handle::StableSwapPool;
pub use ledger::{InMemoryLedger, LedgerError, LedgerOp, LedgerTx, TokenLedger};
pub use lp_token::LpToken;
pub use meta::{BasePool, BasePriceCache, BaseSession, MetaPool, MetaSwap, BASE_CACHE_EXPIRES_SECS};
pub use registry::{PoolRegistry, RegistryError};
pub use state::{FlashLoanFees, PoolPhase, PoolState, TokenRef};
pub use swap::{InitParams, PoolEnv, Swap, MAX_TOKENS, MIN_TOKENS};
pub use types::{Address, AddressError, PoolId};
