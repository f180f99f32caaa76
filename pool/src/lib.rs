//! The account pool.
//!
//! Holds the OAuth-authenticated identities the gateway multiplexes over,
//! selects one per upstream attempt (tier-sorted round robin), keeps
//! per-(account, model) cooldown state with exponential backoff, refreshes
//! tokens before they expire, and persists every mutation through a
//! pluggable store.

mod account;
mod oauth;
mod pool;
mod store;

pub use account::{Account, PerModelState, Tier, TokenBundle};
pub use oauth::{DEFAULT_TOKEN_URL, OAuthClient, RefreshError, RefreshedToken};
pub use pool::{AccountLease, AccountPool, Cooldown, PoolError};
pub use store::{AccountStore, JsonFileStore, MemoryStore, StoreError};
