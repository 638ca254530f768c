//! Shared application state handed to every actix-web handler via
//! `web::Data<AppState>`.

use std::sync::Arc;

use sqlx::PgPool;
use stream_bus::RedisStreamBus;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::registry::ConnectionRegistry;

pub struct AppState {
    pub config: Config,
    pub db: PgPool,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<Dispatcher<RedisStreamBus>>,
    pub dlq: Arc<dead_letter::DlqManager<RedisStreamBus>>,
}
