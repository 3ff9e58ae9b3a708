//! Process-wide singletons (§9 design notes): the breaker table, the store
//! pool and the register-map catalog are constructed once at startup and
//! handed to every pipeline as fields of one shared, cheaply-cloneable
//! context, instead of being reached for as ambient globals.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::breaker::Breaker;
use crate::configuration::config::Config;
use crate::register_map::RegisterCatalog;
use crate::store::Store;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Store,
    pub catalog: Arc<RegisterCatalog>,
    pub breaker: Arc<Breaker>,
    pub http: reqwest::Client,
    pub api_key: Arc<str>,
    pub cancel: CancellationToken,
}
