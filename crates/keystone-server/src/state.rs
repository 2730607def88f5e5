// Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use keystone_core::{AuthService, Config, Database, Mailer, TtlCache, UserService};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub cache: Arc<TtlCache>,
    pub users: Arc<UserService>,
    pub auth: Arc<AuthService>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services together over an opened database.
    pub fn new(config: Config, db: Database, mailer: Arc<dyn Mailer>) -> Result<Self> {
        let db = Arc::new(db);
        let cache = Arc::new(TtlCache::new());
        let users = Arc::new(UserService::new(db.clone(), mailer.clone(), &config));
        let auth = Arc::new(AuthService::new(
            db.clone(),
            cache.clone(),
            users.clone(),
            mailer,
            &config,
        )?);

        Ok(Self {
            config: Arc::new(config),
            db,
            cache,
            users,
            auth,
            started_at: Instant::now(),
        })
    }
}
