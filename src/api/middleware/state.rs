use secrecy::ExposeSecret;
use std::sync::Arc;

use crate::config::Config;
use crate::db::Store;
use crate::services::encryption::FieldKey;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub field_key: Arc<FieldKey>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let field_key = FieldKey::derive(config.field_passphrase.expose_secret());
        Self {
            store,
            config,
            field_key: Arc::new(field_key),
        }
    }
}
