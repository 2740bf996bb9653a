pub mod assets;
pub mod bronze;
pub mod config;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod harvester;
pub mod loaders;
pub mod models;
pub mod observability;
pub mod registry;
pub mod resources;
pub mod scheduler;
pub mod warehouse;

use std::sync::Arc;

use scheduler::{AssetCatalog, RunStateDb};

#[derive(Clone)]
pub struct AppState {
    pub state_db: Arc<RunStateDb>,
    pub catalog: Arc<AssetCatalog>,
}
