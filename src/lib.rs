//! MEXC token ledger.
//!
//! An issuer-controlled fungible token held in process memory. The crate is
//! split into small pieces that the CLI (or any other harness) composes:
//!
//! * [`access`] — the administrative gate: admin identity, the global
//!   transfer switch and the blacklist.
//! * [`ledger`] — balances, total supply and the mutating operations, plus
//!   snapshots with a SHA-256 state root.
//! * [`calls`] — the command envelope, ed25519-signed calls and
//!   [`calls::SharedLedger`], which serializes writers behind one lock.
//! * [`config`] — TOML configuration and display-unit conversion.
//!
//! Every mutating operation takes the caller explicitly and either commits
//! completely or returns a [`LedgerError`] without touching state.

pub mod access;
pub mod calls;
pub mod config;
pub mod ledger;

pub use access::AccessControl;
pub use calls::{Call, CallError, Operation, SharedLedger, SignedCall};
pub use ledger::{
    Account, Address, Amount, LedgerError, LedgerEvent, LedgerSnapshot, LedgerState, Receipt,
    TokenMetadata,
};
