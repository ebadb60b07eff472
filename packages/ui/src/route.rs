//! # Navigation gate
//!
//! [`resolve_route`] maps the three inputs of the bootstrap flow to exactly one
//! [`Route`]. It is pure: no I/O, no clock, no shared state. The
//! [`AuthProvider`](crate::AuthProvider) re-evaluates it after every state change.
//!
//! | Session | Profile | Completion | Route |
//! |---------|---------|------------|-------|
//! | initialising | any | any | `Loading` |
//! | signed out | any | any | `Unauthenticated` |
//! | recovering a password | any | any | `Unauthenticated` (sign-in screen hosts the new-password form) |
//! | signed in | loading / lookup failed | any | `Loading` |
//! | signed in | no role | any | `RoleSelection` |
//! | signed in | role set | unchecked | `Loading` |
//! | signed in | role set | incomplete | `ProfileIncomplete(role)` |
//! | signed in | role set | complete | `Home(role)` |
//!
//! A failed lookup is never read as "no role": that would send an established
//! user back to role selection.

use store::{Profile, Role, StoreError};

/// The screen tree the app shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// Neutral state while an initialisation call is outstanding.
    Loading,
    Unauthenticated,
    RoleSelection,
    ProfileIncomplete(Role),
    Home(Role),
}

/// Where the session tracker stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    SignedOut,
    /// Signed in through a password-reset link; a new password is pending.
    Recovering,
    SignedIn,
}

/// What the profile resolver knows about the signed-in user.
#[derive(Clone, Debug, PartialEq)]
pub enum ProfileState {
    Loading,
    /// Row absent or role unset.
    PendingRole,
    Resolved(Profile),
    /// The lookup failed and nothing was known before.
    Unavailable(StoreError),
}

/// Whether the role's business-detail record exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionState {
    Unchecked,
    Incomplete,
    Complete,
}

pub fn resolve_route(
    session: SessionStatus,
    profile: &ProfileState,
    completion: CompletionState,
) -> Route {
    match session {
        SessionStatus::Initializing => return Route::Loading,
        SessionStatus::SignedOut | SessionStatus::Recovering => return Route::Unauthenticated,
        SessionStatus::SignedIn => {}
    }

    match profile {
        ProfileState::Loading | ProfileState::Unavailable(_) => Route::Loading,
        ProfileState::PendingRole => Route::RoleSelection,
        ProfileState::Resolved(profile) => match completion {
            CompletionState::Unchecked => Route::Loading,
            CompletionState::Incomplete => Route::ProfileIncomplete(profile.role),
            CompletionState::Complete => Route::Home(profile.role),
        },
    }
}
