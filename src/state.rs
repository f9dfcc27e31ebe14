use std::path::PathBuf;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::providers::ProviderRegistry;
use crate::publish::scheduler::Scheduler;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub uploads_dir: PathBuf,
    pub providers: Arc<ProviderRegistry>,
    pub scheduler: Arc<Scheduler>,
}
