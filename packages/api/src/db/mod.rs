//! # Table access: REST client for the hosted Postgres tables
//!
//! The app never talks to Postgres directly. The backend exposes each table over
//! a REST endpoint (`/rest/v1/<table>`) guarded by row-level security, and
//! [`RestStore`] implements the `store` crate's [`store::ProfileStore`] and
//! [`store::DetailStore`] traits on top of it.
//!
//! ## Design
//!
//! - Every request carries the project `apikey` and the signed-in user's access
//!   token (from an [`AccessTokenSource`], normally the `SessionTracker`), so the
//!   row-level-security policies see the caller's identity. An expired token is
//!   renewed before the request, and a 401 renews it and retries once.
//! - Role assignment uses `POST ?on_conflict=user_id` with
//!   `Prefer: resolution=merge-duplicates`, which makes it an upsert.
//! - Transport timeouts become [`store::StoreError::Timeout`]; 5xx, 408 and 429
//!   become `Unavailable`; other 4xx are `Rejected` with PostgREST's message.

mod rest;

pub use rest::{AccessTokenSource, RestStore};
