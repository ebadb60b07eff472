//! Authentication context for the app shell.
//!
//! [`AuthProvider`] owns the [`AuthState`] every screen reads. It listens to the
//! [`SessionTracker`], loads the profile and completion state for whoever is
//! signed in, and re-derives the [`Route`] after each change.
//!
//! Profile loads run on spawned tasks. Each identity change bumps a generation
//! counter before the load starts; a load that finishes under an older
//! generation is dropped, so a slow lookup for a previous user can never
//! overwrite the current one. A role write bumps the generation when it starts
//! and again when the store acknowledges it: a lookup that read the row before
//! the write cannot undo it.
//!
//! Once started, the provider also checks the session every
//! `session_check_secs`. An expired session is renewed in the background, and a
//! refused renewal signs the user out, so the route follows the session without
//! any screen polling for it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use api::{AuthError, AuthEvent, Identity, SessionTracker, SignUpOutcome, Subscription};
use store::{DetailStore, MarketplaceConfig, Profile, ProfileRow, ProfileStore, Role};
use tokio::sync::watch;

use crate::completion::CompletionChecker;
use crate::error::AppError;
use crate::profile::{ProfileLookup, ProfileResolver};
use crate::route::{CompletionState, ProfileState, Route, SessionStatus};

/// Authentication state for the application.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    /// True until the persisted session has been checked.
    pub loading: bool,
    pub identity: Option<Identity>,
    pub profile: ProfileState,
    pub completion: CompletionState,
    /// Last role change made on this device that the store has not acknowledged.
    pub role_write: Option<RoleWrite>,
    /// Signed in through a reset link; a new password is pending.
    pub recovering: bool,
    /// Whether the last store round trip succeeded.
    pub online: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            loading: true,
            identity: None,
            profile: ProfileState::Loading,
            completion: CompletionState::Unchecked,
            role_write: None,
            recovering: false,
            online: false,
        }
    }
}

impl AuthState {
    pub fn session_status(&self) -> SessionStatus {
        if self.loading {
            SessionStatus::Initializing
        } else if self.identity.is_none() {
            SessionStatus::SignedOut
        } else if self.recovering {
            SessionStatus::Recovering
        } else {
            SessionStatus::SignedIn
        }
    }

    pub fn route(&self) -> Route {
        crate::route::resolve_route(self.session_status(), &self.profile, self.completion)
    }

    pub fn profile(&self) -> Option<&Profile> {
        match &self.profile {
            ProfileState::Resolved(profile) => Some(profile),
            _ => None,
        }
    }

    fn is_user(&self, user_id: &str) -> bool {
        self.identity.as_ref().is_some_and(|i| i.id == user_id)
    }
}

/// A role change applied locally ahead of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleWrite {
    /// `None` for "change role".
    pub role: Option<Role>,
    pub status: RoleWriteStatus,
    ticket: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoleWriteStatus {
    InFlight,
    /// The store refused or could not be reached. The local role stays in
    /// effect until [`AuthProvider::retry_role_write`] succeeds.
    Failed(String),
}

type RouteListener = Arc<dyn Fn(&Route) + Send + Sync>;

/// Headless auth context. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AuthProvider {
    inner: Arc<Inner>,
}

struct Inner {
    session: Arc<SessionTracker>,
    resolver: ProfileResolver,
    completion: CompletionChecker,
    state: watch::Sender<AuthState>,
    generation: AtomicU64,
    write_ticket: AtomicU64,
    session_check: Duration,
    watching: AtomicBool,
    route_listeners: Mutex<Vec<RouteListener>>,
    subscription: Mutex<Option<Subscription>>,
}

impl AuthProvider {
    pub fn new(
        session: Arc<SessionTracker>,
        profiles: Arc<dyn ProfileStore>,
        details: Arc<dyn DetailStore>,
        config: &MarketplaceConfig,
    ) -> Self {
        let timeout = config.request_timeout();
        let (state, _) = watch::channel(AuthState::default());
        let inner = Arc::new(Inner {
            session,
            resolver: ProfileResolver::new(profiles, timeout),
            completion: CompletionChecker::new(details, config.details.clone(), timeout),
            state,
            generation: AtomicU64::new(0),
            write_ticket: AtomicU64::new(0),
            session_check: config.session_check_interval(),
            watching: AtomicBool::new(false),
            route_listeners: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let subscription = inner.session.on_change(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(event);
            }
        });
        *inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscription);

        Self { inner }
    }

    /// Restore the persisted session, kick off the first profile load and
    /// start watching for session expiry.
    ///
    /// A failed restore starts the app signed out.
    pub async fn start(&self) -> Route {
        if let Err(e) = self.inner.session.initialize().await {
            tracing::warn!("Session restore failed, starting signed out: {}", e);
            self.inner.handle_event(&AuthEvent::InitialSession(None));
        }
        self.inner.watch_session();
        self.route()
    }

    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn route(&self) -> Route {
        self.inner.state.borrow().route()
    }

    /// Watch every state change.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Called with the new route whenever it differs from the previous one.
    pub fn on_route_change<F>(&self, callback: F)
    where
        F: Fn(&Route) + Send + Sync + 'static,
    {
        self.inner
            .route_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    pub fn session(&self) -> &Arc<SessionTracker> {
        &self.inner.session
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        self.inner.session.sign_in(email, password).await
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> Result<SignUpOutcome, AuthError> {
        self.inner.session.sign_up(email, password, metadata).await
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.session.sign_out().await
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        self.inner.session.request_password_reset(email).await
    }

    /// Handle an incoming reset link. Either way the sign-in screen shows.
    pub async fn handle_deep_link(&self, link: &str) -> Result<Route, AuthError> {
        self.inner.session.recover_from_link(link).await?;
        Ok(self.route())
    }

    /// Finish a password recovery; the app then routes as for a normal sign-in.
    pub async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        self.inner.session.update_password(new_password).await?;
        Ok(())
    }

    /// Assign `role` to the signed-in user.
    ///
    /// The local state switches immediately. If the store write fails the
    /// error is returned, the local role stays, and
    /// [`AuthState::role_write`] reports the failure.
    pub async fn set_role(&self, role: Role) -> Result<Profile, AppError> {
        let written = self.inner.write_role(Some(role)).await?;
        written.ok_or_else(|| AppError::Auth(AuthError::NotSignedIn))
    }

    /// Clear the role and return to role selection. Detail rows are kept.
    pub async fn change_role(&self) -> Result<(), AppError> {
        self.inner.write_role(None).await.map(|_| ())
    }

    /// Re-send a failed role write. Does nothing if none is pending.
    pub async fn retry_role_write(&self) -> Result<(), AppError> {
        let pending = self.inner.state.borrow().role_write.clone();
        match pending {
            Some(RoleWrite {
                role,
                status: RoleWriteStatus::Failed(_),
                ..
            }) => self.inner.write_role(role).await.map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Re-query the detail table, e.g. after the completion form was submitted.
    pub async fn recheck_completion(&self) -> Route {
        let profile = self.inner.state.borrow().profile().cloned();
        if let Some(profile) = profile {
            let generation = self.inner.generation.load(Ordering::SeqCst);
            self.inner.refresh_completion(generation, profile).await;
        }
        self.route()
    }

    /// Reload the profile for the signed-in user, e.g. after a lookup failure.
    pub async fn refresh_profile(&self) -> Route {
        let identity = self.inner.state.borrow().identity.clone();
        let Some(identity) = identity else {
            return self.route();
        };
        let generation = self.inner.bump();
        self.inner.update(|state| {
            if matches!(state.profile, ProfileState::Unavailable(_)) {
                state.profile = ProfileState::Loading;
            }
        });
        self.inner.load(generation, identity).await;
        self.route()
    }
}

impl Inner {
    fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn update(&self, f: impl FnOnce(&mut AuthState)) {
        let mut before = Route::Loading;
        let mut after = Route::Loading;
        self.state.send_modify(|state| {
            before = state.route();
            f(state);
            after = state.route();
        });
        if before == after {
            return;
        }

        tracing::info!("Route {:?} -> {:?}", before, after);
        let listeners: Vec<RouteListener> = self
            .route_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&after);
        }
    }

    /// Periodic expiry check. Stops once the provider is dropped.
    fn watch_session(self: &Arc<Self>) {
        if self.watching.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        let period = self.session_check;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = inner.session.fresh_access_token().await {
                    tracing::warn!("Session check failed: {}", e);
                }
            }
        });
    }

    /// Runs inside the tracker's notification; must not await.
    fn handle_event(self: &Arc<Self>, event: &AuthEvent) {
        let identity = event.identity().cloned();
        let mut same_user = false;
        self.update(|state| {
            same_user = match (&state.identity, &identity) {
                (Some(current), Some(next)) => current.id == next.id,
                _ => false,
            };
            state.loading = false;
            match event {
                AuthEvent::PasswordRecovery(_) => state.recovering = true,
                AuthEvent::UserUpdated(_) | AuthEvent::SignedOut => state.recovering = false,
                AuthEvent::InitialSession(None) => state.recovering = false,
                _ => {}
            }
            if !same_user {
                state.profile = ProfileState::Loading;
                state.completion = CompletionState::Unchecked;
                state.role_write = None;
                state.recovering = matches!(event, AuthEvent::PasswordRecovery(_));
            }
            state.identity = identity.clone();
        });

        let Some(identity) = identity else {
            self.bump();
            return;
        };
        let reload = !same_user
            || matches!(
                event,
                AuthEvent::InitialSession(_) | AuthEvent::SignedIn(_)
            );
        if !reload {
            return;
        }

        let generation = self.bump();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.load(generation, identity).await;
        });
    }

    async fn load(self: &Arc<Self>, generation: u64, identity: Identity) {
        let lookup = self.resolver.load_profile(&identity.id).await;
        if !self.is_current(generation) {
            tracing::debug!("Dropping stale profile lookup for {}", identity.id);
            return;
        }

        let mut resolved = None;
        self.update(|state| {
            if !state.is_user(&identity.id) {
                return;
            }
            match lookup {
                Ok(lookup) => {
                    state.online = true;
                    if state.role_write.is_some() {
                        return;
                    }
                    match lookup {
                        ProfileLookup::Resolved(profile) => {
                            let same_role = state.profile().map(|p| p.role) == Some(profile.role);
                            if !same_role {
                                state.completion = CompletionState::Unchecked;
                            }
                            state.profile = ProfileState::Resolved(profile.clone());
                            resolved = Some(profile);
                        }
                        ProfileLookup::PendingRole => {
                            state.profile = ProfileState::PendingRole;
                            state.completion = CompletionState::Unchecked;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Profile lookup for {} failed: {}", identity.id, e);
                    if e.is_transient() {
                        state.online = false;
                    }
                    if matches!(
                        state.profile,
                        ProfileState::Loading | ProfileState::Unavailable(_)
                    ) {
                        state.profile = ProfileState::Unavailable(e);
                    }
                }
            }
        });

        if let Some(profile) = resolved {
            self.refresh_completion(generation, profile).await;
        }
    }

    async fn refresh_completion(&self, generation: u64, profile: Profile) {
        let completion = self.completion.check(&profile).await;
        if !self.is_current(generation) {
            return;
        }
        self.update(|state| {
            let matches = state
                .profile()
                .is_some_and(|p| p.user_id == profile.user_id && p.role == profile.role);
            if matches {
                state.completion = completion;
            }
        });
    }

    async fn write_role(self: &Arc<Self>, role: Option<Role>) -> Result<Option<Profile>, AppError> {
        let identity = self
            .state
            .borrow()
            .identity
            .clone()
            .ok_or(AuthError::NotSignedIn)?;
        let ticket = self.write_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let row = role.map(|role| ProfileRow::assign(&identity.id, role));
        let local = row.clone().and_then(ProfileRow::into_profile);

        self.update(|state| {
            self.bump();
            match &local {
                Some(profile) => {
                    let same_role = state.profile().map(|p| p.role) == Some(profile.role);
                    if !same_role {
                        state.completion = CompletionState::Unchecked;
                    }
                    state.profile = ProfileState::Resolved(profile.clone());
                }
                None => {
                    state.profile = ProfileState::PendingRole;
                    state.completion = CompletionState::Unchecked;
                }
            }
            state.role_write = Some(RoleWrite {
                role,
                status: RoleWriteStatus::InFlight,
                ticket,
            });
        });

        let result = self.resolver.write_role(&identity.id, row.as_ref()).await;

        self.update(|state| {
            if !state.is_user(&identity.id) {
                return;
            }
            let Some(write) = state.role_write.as_mut() else {
                return;
            };
            if write.ticket != ticket {
                return;
            }
            match &result {
                Ok(_) => {
                    self.bump();
                    state.role_write = None;
                    state.online = true;
                }
                Err(e) => {
                    tracing::warn!("Role write failed, keeping local role: {}", e);
                    write.status = RoleWriteStatus::Failed(e.to_string());
                    if e.is_transient() {
                        state.online = false;
                    }
                }
            }
        });

        if let Some(profile) = local {
            let generation = self.generation.load(Ordering::SeqCst);
            self.refresh_completion(generation, profile).await;
        }
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::{IdentityProvider, MemoryIdentityProvider};
    use async_trait::async_trait;
    use store::{MemoryStore, StoreError};
    use tokio::sync::Notify;

    const PASSWORD: &str = "hunter22";

    fn tracker(provider: &MemoryIdentityProvider) -> Arc<SessionTracker> {
        let config = MarketplaceConfig::default();
        Arc::new(SessionTracker::new(
            Arc::new(provider.clone()),
            config.request_timeout(),
            &config.auth.reset_redirect,
        ))
    }

    fn auth_with(
        provider: &MemoryIdentityProvider,
        profiles: Arc<dyn ProfileStore>,
        store: &MemoryStore,
    ) -> AuthProvider {
        AuthProvider::new(
            tracker(provider),
            profiles,
            Arc::new(store.clone()),
            &MarketplaceConfig::default(),
        )
    }

    fn auth(provider: &MemoryIdentityProvider, store: &MemoryStore) -> AuthProvider {
        auth_with(provider, Arc::new(store.clone()), store)
    }

    fn record_routes(auth: &AuthProvider) -> Arc<Mutex<Vec<Route>>> {
        let routes = Arc::new(Mutex::new(Vec::new()));
        let sink = routes.clone();
        auth.on_route_change(move |route| sink.lock().unwrap().push(*route));
        routes
    }

    async fn settle(auth: &AuthProvider, expected: Route) -> AuthState {
        let mut rx = auth.subscribe();
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|state| state.route() == expected),
        )
        .await
        .expect("route never settled")
        .unwrap()
        .clone();
        state
    }

    /// Persist a session the way an earlier app run would have.
    async fn signed_in_before(provider: &MemoryIdentityProvider, email: &str) -> Identity {
        let identity = provider.add_account(email, PASSWORD);
        provider.sign_in_with_password(email, PASSWORD).await.unwrap();
        identity
    }

    /// Profile store that can hold one lookup, or one upsert, until released.
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryStore,
        hold_select: Mutex<Option<String>>,
        hold_upsert: Mutex<bool>,
        reached: Notify,
        release: Notify,
        done: Notify,
    }

    impl GatedStore {
        fn new(inner: MemoryStore) -> Arc<Self> {
            Arc::new(Self {
                inner,
                ..Default::default()
            })
        }

        /// The next lookup for `user_id` reads the row, then waits.
        fn hold_next_select(&self, user_id: &str) {
            *self.hold_select.lock().unwrap() = Some(user_id.to_string());
        }

        /// The next upsert waits before writing.
        fn hold_next_upsert(&self) {
            *self.hold_upsert.lock().unwrap() = true;
        }
    }

    #[async_trait]
    impl ProfileStore for GatedStore {
        async fn select_profile(&self, user_id: &str) -> store::error::Result<Option<ProfileRow>> {
            let held = {
                let mut hold = self.hold_select.lock().unwrap();
                if hold.as_deref() == Some(user_id) {
                    hold.take();
                    true
                } else {
                    false
                }
            };
            let row = self.inner.select_profile(user_id).await;
            if held {
                self.reached.notify_one();
                self.release.notified().await;
                self.done.notify_one();
            }
            row
        }

        async fn upsert_profile(&self, row: &ProfileRow) -> store::error::Result<ProfileRow> {
            let held = std::mem::take(&mut *self.hold_upsert.lock().unwrap());
            if held {
                self.reached.notify_one();
                self.release.notified().await;
            }
            self.inner.upsert_profile(row).await
        }

        async fn update_role(
            &self,
            user_id: &str,
            role: Option<Role>,
        ) -> store::error::Result<Option<ProfileRow>> {
            self.inner.update_role(user_id, role).await
        }
    }

    #[tokio::test]
    async fn test_cold_start_goes_straight_home() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = signed_in_before(&provider, "a@example.com").await;
        store.insert_profile(ProfileRow::assign(&identity.id, Role::Startup));
        store.insert_detail("startups", &identity.id);

        let auth = auth(&provider, &store);
        let routes = record_routes(&auth);
        assert_eq!(auth.route(), Route::Loading);

        assert_eq!(auth.start().await, Route::Loading);
        let state = settle(&auth, Route::Home(Role::Startup)).await;

        assert_eq!(state.identity, Some(identity));
        assert!(state.online);
        assert_eq!(*routes.lock().unwrap(), vec![Route::Home(Role::Startup)]);
    }

    #[tokio::test]
    async fn test_no_session_then_first_sign_in() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        provider.add_account("a@example.com", PASSWORD);
        let auth = auth(&provider, &store);

        assert_eq!(auth.start().await, Route::Unauthenticated);

        assert!(auth.sign_in("a@example.com", "wrong").await.is_err());
        assert_eq!(auth.route(), Route::Unauthenticated);

        auth.sign_in("a@example.com", PASSWORD).await.unwrap();
        settle(&auth, Route::RoleSelection).await;
    }

    #[tokio::test]
    async fn test_sign_up_waits_for_confirmation() {
        let provider = MemoryIdentityProvider::new().with_confirmation_required();
        let store = MemoryStore::new();
        let auth = auth(&provider, &store);
        auth.start().await;

        let outcome = auth
            .sign_up("new@example.com", PASSWORD, serde_json::json!({}))
            .await
            .unwrap();
        assert!(outcome.session.is_none());
        assert_eq!(auth.route(), Route::Unauthenticated);

        provider.confirm("new@example.com");
        auth.sign_in("new@example.com", PASSWORD).await.unwrap();
        settle(&auth, Route::RoleSelection).await;
    }

    #[tokio::test]
    async fn test_missing_detail_row_then_completed() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = signed_in_before(&provider, "b@example.com").await;
        store.insert_profile(ProfileRow::assign(&identity.id, Role::Investor));

        let auth = auth(&provider, &store);
        auth.start().await;
        settle(&auth, Route::ProfileIncomplete(Role::Investor)).await;

        store.insert_detail("investors", &identity.id);
        assert_eq!(auth.recheck_completion().await, Route::Home(Role::Investor));
    }

    #[tokio::test]
    async fn test_elevated_role_skips_completion() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = signed_in_before(&provider, "root@example.com").await;
        store.insert_profile(ProfileRow::assign(&identity.id, Role::SuperAdmin));

        let auth = auth(&provider, &store);
        auth.start().await;
        settle(&auth, Route::Home(Role::SuperAdmin)).await;
    }

    #[tokio::test]
    async fn test_lookup_failure_never_reads_as_no_role() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = signed_in_before(&provider, "a@example.com").await;
        store.insert_profile(ProfileRow::assign(&identity.id, Role::Startup));
        store.insert_detail("startups", &identity.id);
        store.set_offline(true);

        let auth = auth(&provider, &store);
        let routes = record_routes(&auth);
        auth.start().await;

        let mut rx = auth.subscribe();
        let state = rx
            .wait_for(|s| matches!(s.profile, ProfileState::Unavailable(_)))
            .await
            .unwrap()
            .clone();
        assert_eq!(state.route(), Route::Loading);
        assert!(!state.online);

        store.set_offline(false);
        assert_eq!(auth.refresh_profile().await, Route::Home(Role::Startup));
        assert!(!routes.lock().unwrap().contains(&Route::RoleSelection));
    }

    #[tokio::test]
    async fn test_stale_lookup_for_previous_user_is_dropped() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let first = provider.add_account("first@example.com", PASSWORD);
        let second = provider.add_account("second@example.com", PASSWORD);
        store.insert_profile(ProfileRow::assign(&first.id, Role::Startup));
        store.insert_detail("startups", &first.id);
        store.insert_profile(ProfileRow::assign(&second.id, Role::Investor));
        store.insert_detail("investors", &second.id);

        let gated = GatedStore::new(store.clone());
        gated.hold_next_select(&first.id);
        let auth = auth_with(&provider, gated.clone(), &store);
        auth.start().await;

        auth.sign_in("first@example.com", PASSWORD).await.unwrap();
        auth.sign_out().await.unwrap();
        auth.sign_in("second@example.com", PASSWORD).await.unwrap();
        settle(&auth, Route::Home(Role::Investor)).await;

        gated.release.notify_one();
        gated.done.notified().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = auth.state();
        assert_eq!(state.route(), Route::Home(Role::Investor));
        assert_eq!(state.profile().map(|p| p.user_id.clone()), Some(second.id));
    }

    #[tokio::test]
    async fn test_reload_read_before_set_role_cannot_undo_it() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = provider.add_account("a@example.com", PASSWORD);
        store.insert_detail("investors", &identity.id);
        let gated = GatedStore::new(store.clone());
        let auth = auth_with(&provider, gated.clone(), &store);
        auth.start().await;
        auth.sign_in("a@example.com", PASSWORD).await.unwrap();
        settle(&auth, Route::RoleSelection).await;

        // The reload reads "no role", then stalls.
        gated.hold_next_select(&identity.id);
        let reload = tokio::spawn({
            let auth = auth.clone();
            async move { auth.refresh_profile().await }
        });
        gated.reached.notified().await;

        auth.set_role(Role::Investor).await.unwrap();
        assert_eq!(auth.route(), Route::Home(Role::Investor));

        gated.release.notify_one();
        assert_eq!(reload.await.unwrap(), Route::Home(Role::Investor));
        assert_eq!(auth.route(), Route::Home(Role::Investor));
        assert_eq!(store.profile(&identity.id).unwrap().role, Some(Role::Investor));
    }

    #[tokio::test]
    async fn test_reload_read_before_change_role_cannot_undo_it() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = signed_in_before(&provider, "a@example.com").await;
        store.insert_profile(ProfileRow::assign(&identity.id, Role::Investor));
        store.insert_detail("investors", &identity.id);
        let gated = GatedStore::new(store.clone());
        let auth = auth_with(&provider, gated.clone(), &store);
        auth.start().await;
        settle(&auth, Route::Home(Role::Investor)).await;

        gated.hold_next_select(&identity.id);
        let reload = tokio::spawn({
            let auth = auth.clone();
            async move { auth.refresh_profile().await }
        });
        gated.reached.notified().await;

        auth.change_role().await.unwrap();
        assert_eq!(auth.route(), Route::RoleSelection);

        gated.release.notify_one();
        assert_eq!(reload.await.unwrap(), Route::RoleSelection);
        assert_eq!(auth.route(), Route::RoleSelection);
        assert_eq!(store.profile(&identity.id).unwrap().role, None);
    }

    #[tokio::test]
    async fn test_user_switch_during_role_write() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let first = provider.add_account("first@example.com", PASSWORD);
        let second = provider.add_account("second@example.com", PASSWORD);
        store.insert_profile(ProfileRow::assign(&second.id, Role::Startup));
        store.insert_detail("startups", &second.id);
        store.insert_detail("investors", &first.id);
        let gated = GatedStore::new(store.clone());
        let auth = auth_with(&provider, gated.clone(), &store);
        auth.start().await;
        auth.sign_in("first@example.com", PASSWORD).await.unwrap();
        settle(&auth, Route::RoleSelection).await;

        gated.hold_next_upsert();
        let write = tokio::spawn({
            let auth = auth.clone();
            async move { auth.set_role(Role::Investor).await }
        });
        gated.reached.notified().await;
        assert!(matches!(
            auth.state().role_write,
            Some(RoleWrite {
                status: RoleWriteStatus::InFlight,
                ..
            })
        ));

        auth.sign_out().await.unwrap();
        auth.sign_in("second@example.com", PASSWORD).await.unwrap();
        settle(&auth, Route::Home(Role::Startup)).await;

        gated.release.notify_one();
        let written = write.await.unwrap().unwrap();
        assert_eq!(written.user_id, first.id);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = auth.state();
        assert_eq!(state.route(), Route::Home(Role::Startup));
        assert_eq!(state.role_write, None);
        assert_eq!(state.profile().map(|p| p.user_id.clone()), Some(second.id));
        assert_eq!(store.profile(&first.id).unwrap().role, Some(Role::Investor));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expiry_followed_in_background() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = provider.add_account("a@example.com", PASSWORD);
        store.insert_profile(ProfileRow::assign(&identity.id, Role::Admin));
        let auth = auth(&provider, &store);
        auth.start().await;

        provider.set_session_ttl(0);
        auth.sign_in("a@example.com", PASSWORD).await.unwrap();
        settle(&auth, Route::Home(Role::Admin)).await;
        let expired = auth.session().access_token();

        // Renewed on the next check without anyone asking.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_ne!(auth.session().access_token(), expired);
        assert_eq!(auth.route(), Route::Home(Role::Admin));

        // A refused renewal signs out.
        provider.revoke_all_sessions();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(auth.route(), Route::Unauthenticated);
        assert_eq!(auth.state().identity, None);
    }

    #[tokio::test]
    async fn test_set_role_twice_is_stable() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = provider.add_account("a@example.com", PASSWORD);
        store.insert_detail("investors", &identity.id);
        let auth = auth(&provider, &store);
        auth.start().await;
        auth.sign_in("a@example.com", PASSWORD).await.unwrap();
        settle(&auth, Route::RoleSelection).await;

        let routes = record_routes(&auth);
        let first = auth.set_role(Role::Investor).await.unwrap();
        assert_eq!(auth.route(), Route::Home(Role::Investor));
        let second = auth.set_role(Role::Investor).await.unwrap();

        assert_eq!(auth.route(), Route::Home(Role::Investor));
        assert_eq!(
            *routes.lock().unwrap(),
            vec![Route::Loading, Route::Home(Role::Investor)]
        );
        assert_ne!(first.display_id, second.display_id);
        assert_eq!(store.profile_count(), 1);
        assert_eq!(auth.state().role_write, None);
    }

    #[tokio::test]
    async fn test_failed_role_write_keeps_local_role_until_retried() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = provider.add_account("a@example.com", PASSWORD);
        let auth = auth(&provider, &store);
        auth.start().await;
        auth.sign_in("a@example.com", PASSWORD).await.unwrap();
        settle(&auth, Route::RoleSelection).await;

        store.fail_next(StoreError::Unavailable("offline".into()));
        assert!(auth.set_role(Role::Startup).await.is_err());

        let state = auth.state();
        assert_eq!(state.route(), Route::ProfileIncomplete(Role::Startup));
        assert!(matches!(
            state.role_write,
            Some(RoleWrite {
                role: Some(Role::Startup),
                status: RoleWriteStatus::Failed(_),
                ..
            })
        ));
        assert!(store.profile(&identity.id).is_none());

        // A reload meanwhile must not undo the local choice.
        assert_eq!(auth.refresh_profile().await, Route::ProfileIncomplete(Role::Startup));

        auth.retry_role_write().await.unwrap();
        assert_eq!(auth.state().role_write, None);
        assert_eq!(store.profile(&identity.id).unwrap().role, Some(Role::Startup));
    }

    #[tokio::test]
    async fn test_change_role_returns_to_selection() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = signed_in_before(&provider, "a@example.com").await;
        store.insert_profile(ProfileRow::assign(&identity.id, Role::Investor));
        store.insert_detail("investors", &identity.id);
        let auth = auth(&provider, &store);
        auth.start().await;
        settle(&auth, Route::Home(Role::Investor)).await;

        auth.change_role().await.unwrap();
        assert_eq!(auth.route(), Route::RoleSelection);
        assert_eq!(store.profile(&identity.id).unwrap().role, None);

        auth.set_role(Role::Investor).await.unwrap();
        assert_eq!(auth.route(), Route::Home(Role::Investor));
    }

    #[tokio::test]
    async fn test_sign_out_clears_user_state() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = signed_in_before(&provider, "a@example.com").await;
        store.insert_profile(ProfileRow::assign(&identity.id, Role::Admin));
        let auth = auth(&provider, &store);
        auth.start().await;
        settle(&auth, Route::Home(Role::Admin)).await;

        auth.sign_out().await.unwrap();
        let state = auth.state();
        assert_eq!(state.route(), Route::Unauthenticated);
        assert_eq!(state.identity, None);
        assert_eq!(state.profile, ProfileState::Loading);
    }

    #[tokio::test]
    async fn test_recovery_link_stays_on_sign_in_until_password_updated() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let identity = provider.add_account("a@example.com", PASSWORD);
        store.insert_profile(ProfileRow::assign(&identity.id, Role::Admin));
        let auth = auth(&provider, &store);
        auth.start().await;

        auth.request_password_reset("a@example.com").await.unwrap();
        let tokens = provider.recovery_tokens("a@example.com").unwrap();
        let link = format!(
            "app://auth/reset#access_token={}&refresh_token={}&type=recovery",
            tokens.access_token, tokens.refresh_token
        );
        assert_eq!(auth.handle_deep_link(&link).await.unwrap(), Route::Unauthenticated);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(auth.route(), Route::Unauthenticated);
        assert!(auth.state().recovering);

        auth.update_password("correct horse").await.unwrap();
        settle(&auth, Route::Home(Role::Admin)).await;
    }

    #[tokio::test]
    async fn test_bad_link_is_rejected() {
        let provider = MemoryIdentityProvider::new();
        let store = MemoryStore::new();
        let auth = auth(&provider, &store);
        auth.start().await;

        assert!(matches!(
            auth.handle_deep_link("app://elsewhere").await,
            Err(AuthError::InvalidLink(_))
        ));
        assert_eq!(
            auth.handle_deep_link("app://auth/reset").await,
            Ok(Route::Unauthenticated)
        );
    }
}
