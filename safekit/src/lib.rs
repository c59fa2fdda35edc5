#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    dead_code
)]

//! `safekit` implements the proposal lifecycle of a [Safe](https://safe.global/) multisig:
//! drafting a transaction from one or more calls, collecting owner signatures up to the
//! threshold, persisting the active proposal per account, and executing it on-chain
//! through step workflows.
//!
//! Chain access goes through a host-provided EIP-1193 wallet provider and persistence
//! through a host-provided key-value store, so the same core runs behind a browser
//! extension or a mobile wallet.

pub use safekit_macros::{safekit_error, safekit_export};

/// Introduces low level primitives: validation, chains, configuration, storage and logging.
pub mod primitives;

/// The bridge to the host's wallet provider and the connection workflow.
pub mod provider;

/// Safe transactions, proposals, signatures and the execution / deployment workflows.
///
/// Reference: <https://github.com/safe-global/safe-smart-account>
pub mod safe;

/// The per-Safe session object exposed to hosts.
pub mod session;

/// Persistence of proposals and wallet data.
pub mod storage;

/// Ordered step workflows.
pub mod workflow;

#[cfg(test)]
mod test_utils;

uniffi::setup_scaffolding!("safekit");
