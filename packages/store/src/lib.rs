pub mod config;
pub mod error;
pub mod models;
pub mod repo;

mod memory;
pub use memory::MemoryStore;

pub use config::MarketplaceConfig;
pub use error::StoreError;
pub use models::{generate_display_id, Profile, ProfileRow, Role};
pub use repo::{DetailStore, ProfileStore};
