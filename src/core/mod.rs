//! Clinic components: authorization gate, live collections, entry forms,
//! history lookup and the session timer.

use std::sync::Arc;

use crate::db::DocumentStore;

pub mod auth;
pub mod forms;
pub mod history;
pub mod live;
pub mod timer;

use auth::IdentityProvider;

/// Store and identity handles, constructed once by the caller and passed to every component.
#[derive(Clone)]
pub struct ClinicClient {
    pub store: Arc<dyn DocumentStore>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl ClinicClient {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identity }
    }
}
