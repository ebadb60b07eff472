//! Authentication: identity provider clients, session tracking, reset links.

mod config;
mod deep_link;
mod gotrue;
mod memory;
mod provider;
mod session;
mod storage;

pub use config::BackendConfig;
pub use deep_link::{DeepLink, RecoveryTokens};
pub use gotrue::GoTrueClient;
pub use memory::MemoryIdentityProvider;
pub use provider::{AuthEvent, IdentityProvider, SignUpOutcome};
pub use session::{SessionTracker, Subscription};
pub use storage::{FileSessionStorage, MemorySessionStorage, SessionStorage};
