//! # Authorization gate
//!
//! Signing in only proves who someone is. Access to the clinic additionally
//! requires an authorization record (`usuario/{email}`) with `autorizado = true`,
//! which only an administrator can set. The gate:
//!
//! - follows identity changes from the [`IdentityProvider`]
//! - looks up the record for the signed-in email
//! - creates it, unauthorized, on first sign-in
//! - publishes one of [`GateState`]'s variants for the shell to render
//!
//! Lookup failures deny access with a generic message and are not retried.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, instrument, warn};

use super::ClinicClient;
use crate::{
    db::{CollectionPath, DocumentId, NewDocument, REGISTERED_AT},
    error::StoreResult,
    models::UserRecord,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub id_token: Option<String>,
}

impl Identity {
    pub fn new(email: &str, display_name: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            display_name: Some(display_name.to_string()),
            id_token: None,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current identity, updated on every sign-in and sign-out.
    fn session(&self) -> watch::Receiver<Option<Identity>>;

    async fn sign_in(&self) -> Result<Identity>;

    async fn sign_out(&self) -> Result<()>;
}

/// Signs in a fixed, preconfigured account.
pub struct LocalIdentityProvider {
    account: Option<Identity>,
    session: watch::Sender<Option<Identity>>,
}

impl LocalIdentityProvider {
    pub fn new(account: Option<Identity>) -> Self {
        let (session, _) = watch::channel(None);
        Self { account, session }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    fn session(&self) -> watch::Receiver<Option<Identity>> {
        self.session.subscribe()
    }

    async fn sign_in(&self) -> Result<Identity> {
        let account = self
            .account
            .clone()
            .ok_or_else(|| anyhow!("no account configured for sign-in"))?;

        self.session.send_replace(Some(account.clone()));
        Ok(account)
    }

    async fn sign_out(&self) -> Result<()> {
        self.session.send_replace(None);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    NotAuthorized,
    PendingApproval,
    MissingEmail,
    LookupFailed,
}

impl DenialReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenialReason::NotAuthorized => "Your account has not been authorized by the administrator yet.",
            DenialReason::PendingApproval => "Your account has been registered and is pending authorization.",
            DenialReason::MissingEmail => "Could not read the account's email address.",
            DenialReason::LookupFailed => "Could not verify user permissions.",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateState {
    Loading,
    SignedOut,
    Denied { identity: Identity, reason: DenialReason },
    Authorized { identity: Identity, record: UserRecord },
}

impl GateState {
    pub fn is_authorized(&self) -> bool {
        matches!(self, GateState::Authorized { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Home,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Home => "/",
        }
    }
}

/// Where the shell should navigate from `current`, if anywhere.
pub fn redirect(state: &GateState, current: Route) -> Option<Route> {
    match (state, current) {
        (GateState::SignedOut, Route::Home) => Some(Route::Login),
        // No usable account behind this identity, treated like a signed-out visitor
        (
            GateState::Denied {
                reason: DenialReason::MissingEmail,
                ..
            },
            Route::Home,
        ) => Some(Route::Login),
        (GateState::Authorized { .. }, Route::Login) => Some(Route::Home),
        _ => None,
    }
}

/// Stops following identity changes when dropped.
pub struct GateWatcher(JoinHandle<()>);

impl Drop for GateWatcher {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone)]
pub struct AuthGate {
    client: ClinicClient,
    state: Arc<watch::Sender<GateState>>,
}

impl AuthGate {
    pub fn new(client: ClinicClient) -> Self {
        let (state, _) = watch::channel(GateState::Loading);
        Self {
            client,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    /// Follows the identity provider, re-evaluating on every change.
    pub fn start(&self) -> GateWatcher {
        let mut session = self.client.identity.session();
        let gate = self.clone();

        GateWatcher(tokio::spawn(async move {
            loop {
                let identity = session.borrow_and_update().clone();
                gate.apply(identity).await;

                if session.changed().await.is_err() {
                    break;
                }
            }
        }))
    }

    /// Waits for the first decision after [`GateState::Loading`].
    pub async fn settled(&self) -> GateState {
        let mut states = self.subscribe();
        loop {
            let state = states.borrow_and_update().clone();
            if state != GateState::Loading || states.changed().await.is_err() {
                return state;
            }
        }
    }

    pub async fn apply(&self, identity: Option<Identity>) -> GateState {
        let state = self.evaluate(identity).await;
        self.state.send_replace(state.clone());
        state
    }

    #[instrument(skip(self, identity), fields(email = ?identity.as_ref().and_then(|i| i.email.as_deref())))]
    pub async fn evaluate(&self, identity: Option<Identity>) -> GateState {
        let Some(identity) = identity else {
            return GateState::SignedOut;
        };

        let Some(email) = identity.email.clone().filter(|e| !e.is_empty()) else {
            warn!("Signed-in identity has no email");
            return GateState::Denied {
                identity,
                reason: DenialReason::MissingEmail,
            };
        };

        match self.lookup(&identity, &email).await {
            Ok(state) => state,
            Err(e) => {
                error!("Error fetching user data: {}", e);
                GateState::Denied {
                    identity,
                    reason: DenialReason::LookupFailed,
                }
            }
        }
    }

    async fn lookup(&self, identity: &Identity, email: &str) -> StoreResult<GateState> {
        let users = CollectionPath::users();
        let id = DocumentId::new(email);
        let store = &self.client.store;

        let existing = match store.get(&users, &id).await? {
            Some(doc) => doc,
            None => {
                let record = UserRecord::pending(identity.display_name.as_deref());
                let document = NewDocument::from_record(&record)?.with_server_timestamp(REGISTERED_AT);

                if store.create(&users, &id, document).await? {
                    info!("Registered {} pending authorization", email);
                    return Ok(GateState::Denied {
                        identity: identity.clone(),
                        reason: DenialReason::PendingApproval,
                    });
                }

                // Another session registered this email first
                match store.get(&users, &id).await? {
                    Some(doc) => doc,
                    None => {
                        return Ok(GateState::Denied {
                            identity: identity.clone(),
                            reason: DenialReason::PendingApproval,
                        })
                    }
                }
            }
        };

        let record = existing.decode::<UserRecord>()?.record;
        if record.authorized {
            info!("Access granted");
            Ok(GateState::Authorized {
                identity: identity.clone(),
                record,
            })
        } else {
            Ok(GateState::Denied {
                identity: identity.clone(),
                reason: DenialReason::NotAuthorized,
            })
        }
    }

    /// Runs the provider's sign-in flow. Navigates home on success.
    pub async fn sign_in(&self) -> Option<Route> {
        match self.client.identity.sign_in().await {
            Ok(_) => Some(Route::Home),
            Err(e) => {
                error!("Error signing in: {}", e);
                None
            }
        }
    }

    pub async fn sign_out(&self) -> Option<Route> {
        match self.client.identity.sign_out().await {
            Ok(()) => {
                self.state.send_replace(GateState::SignedOut);
                Some(Route::Login)
            }
            Err(e) => {
                error!("Error signing out: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memory::MemoryStore, Fields};
    use serde_json::json;
    use test_case::test_case;

    fn gate_with(store: &MemoryStore, account: Option<Identity>) -> AuthGate {
        AuthGate::new(ClinicClient::new(
            Arc::new(store.clone()),
            Arc::new(LocalIdentityProvider::new(account)),
        ))
    }

    fn set_authorized(store: &MemoryStore, email: &str, authorized: bool) {
        let mut fields = Fields::new();
        fields.insert("nombre".into(), json!("Ana"));
        fields.insert("autorizado".into(), json!(authorized));
        store.put(&CollectionPath::users(), &DocumentId::new(email), fields);
    }

    #[tokio::test]
    async fn authorized_records_open_the_gate() {
        let store = MemoryStore::new();
        set_authorized(&store, "ana@example.com", true);

        let state = gate_with(&store, None)
            .evaluate(Some(Identity::new("ana@example.com", "Ana")))
            .await;

        assert!(state.is_authorized());
    }

    #[tokio::test]
    async fn unauthorized_records_stay_denied_on_every_attempt() {
        let store = MemoryStore::new();
        set_authorized(&store, "ana@example.com", false);
        let gate = gate_with(&store, None);

        for _ in 0..3 {
            let state = gate.evaluate(Some(Identity::new("ana@example.com", "Ana"))).await;
            assert!(matches!(
                state,
                GateState::Denied { reason: DenialReason::NotAuthorized, .. }
            ));
        }
    }

    #[tokio::test]
    async fn first_sign_in_registers_one_pending_record() {
        let store = MemoryStore::new();
        let gate = gate_with(&store, None);
        let identity = Identity::new("new@example.com", "Nuevo");

        let first = gate.evaluate(Some(identity.clone())).await;
        let second = gate.evaluate(Some(identity)).await;

        assert!(matches!(
            first,
            GateState::Denied { reason: DenialReason::PendingApproval, .. }
        ));
        assert!(matches!(
            second,
            GateState::Denied { reason: DenialReason::NotAuthorized, .. }
        ));

        let users = store.documents(&CollectionPath::users());
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].fields["autorizado"], json!(false));
        assert_eq!(users[0].fields["nombre"], json!("Nuevo"));
        assert!(users[0].fields.contains_key(REGISTERED_AT));
    }

    #[tokio::test]
    async fn concurrent_first_sign_ins_create_a_single_record() {
        let store = MemoryStore::new();
        let gate = gate_with(&store, None);
        let identity = Identity::new("race@example.com", "Race");

        let (a, b) = tokio::join!(
            gate.evaluate(Some(identity.clone())),
            gate.evaluate(Some(identity.clone()))
        );

        assert!(!a.is_authorized() && !b.is_authorized());
        assert_eq!(store.documents(&CollectionPath::users()).len(), 1);
    }

    #[tokio::test]
    async fn store_failures_deny_with_generic_message() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let state = gate_with(&store, None)
            .evaluate(Some(Identity::new("ana@example.com", "Ana")))
            .await;

        assert!(matches!(
            state,
            GateState::Denied { reason: DenialReason::LookupFailed, .. }
        ));
    }

    #[tokio::test]
    async fn identities_without_email_are_denied() {
        let store = MemoryStore::new();
        let state = gate_with(&store, None)
            .evaluate(Some(Identity::default()))
            .await;

        assert!(matches!(
            state,
            GateState::Denied { reason: DenialReason::MissingEmail, .. }
        ));
        assert!(store.documents(&CollectionPath::users()).is_empty());
    }

    #[tokio::test]
    async fn watcher_follows_sign_in_and_sign_out() {
        let store = MemoryStore::new();
        set_authorized(&store, "ana@example.com", true);
        let gate = gate_with(&store, Some(Identity::new("ana@example.com", "Ana")));
        let _watcher = gate.start();

        assert_eq!(gate.settled().await, GateState::SignedOut);

        let mut states = gate.subscribe();
        assert_eq!(gate.sign_in().await, Some(Route::Home));
        states.changed().await.unwrap();
        assert!(states.borrow().is_authorized());

        assert_eq!(gate.sign_out().await, Some(Route::Login));
        assert_eq!(gate.state(), GateState::SignedOut);
    }

    #[tokio::test]
    async fn failed_sign_in_stays_put() {
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_sign_in()
            .returning(|| Err(anyhow!("popup closed by user")));

        let gate = AuthGate::new(ClinicClient::new(
            Arc::new(MemoryStore::new()),
            Arc::new(provider),
        ));

        assert_eq!(gate.sign_in().await, None);
        assert_eq!(gate.state(), GateState::Loading);
    }

    #[test_case(GateState::SignedOut, Route::Home, Some(Route::Login) ; "signed out leaves home")]
    #[test_case(GateState::SignedOut, Route::Login, None ; "signed out stays on login")]
    #[test_case(GateState::Loading, Route::Home, None ; "loading waits")]
    #[test_case(
        GateState::Authorized { identity: Identity::default(), record: UserRecord::default() },
        Route::Login,
        Some(Route::Home) ; "authorized leaves login"
    )]
    #[test_case(
        GateState::Denied { identity: Identity::default(), reason: DenialReason::NotAuthorized },
        Route::Home,
        None ; "denied renders in place"
    )]
    #[test_case(
        GateState::Denied { identity: Identity::default(), reason: DenialReason::MissingEmail },
        Route::Home,
        Some(Route::Login) ; "missing email leaves home"
    )]
    fn redirects(state: GateState, current: Route, expected: Option<Route>) {
        assert_eq!(redirect(&state, current), expected);
    }
}
