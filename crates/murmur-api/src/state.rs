use std::sync::Arc;

use chrono::Duration;

use murmur_db::Database;
use murmur_gateway::delivery::Dispatcher;
use murmur_gateway::presence::PresenceRegistry;
use murmur_gateway::receipts::ReceiptProcessor;

use crate::notify::CodeNotifier;

pub type AppState = Arc<AppStateInner>;

/// Lifetimes and exposure policy for the phone verification flow.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub session_ttl: Duration,
    pub code_ttl: Duration,
    /// Echo verification codes in the start response. Development only.
    pub expose_codes: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_ttl: Duration::days(30),
            code_ttl: Duration::minutes(10),
            expose_codes: false,
        }
    }
}

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub presence: PresenceRegistry,
    pub dispatcher: Dispatcher,
    pub receipts: ReceiptProcessor,
    pub settings: AuthSettings,
    pub notifier: Arc<dyn CodeNotifier>,
}

impl AppStateInner {
    /// Wire the real-time components around one shared presence registry.
    pub fn new(db: Arc<Database>, settings: AuthSettings, notifier: Arc<dyn CodeNotifier>) -> AppState {
        let presence = PresenceRegistry::new();
        Arc::new(Self {
            dispatcher: Dispatcher::new(presence.clone(), db.clone()),
            receipts: ReceiptProcessor::new(presence.clone(), db.clone()),
            presence,
            db,
            settings,
            notifier,
        })
    }
}
