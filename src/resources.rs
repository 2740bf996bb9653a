use sqlx::PgPool;

use crate::bronze::BronzeStore;
use crate::config::Settings;
use crate::graph::GraphSync;
use crate::harvester::Harvester;
use crate::warehouse;

/// Typed handles to every external system, created once per process from
/// the environment-backed settings and injected into producers. All
/// handles are clone-cheap and internally pooled.
pub struct Resources {
    pub http: reqwest::Client,
    pub harvester: Harvester,
    pub bronze: BronzeStore,
    pub warehouse: PgPool,
    pub graph: GraphSync,
    /// Reserved handle; the embedded run-state store covers cursor needs.
    pub cache_uri: Option<String>,
}

impl Resources {
    /// Connect everything. A failure here is a startup failure: producers
    /// never see a partially-configured resource bundle.
    pub async fn initialize(settings: &Settings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("hydroflux/0.3")
            .build()?;

        let bronze = BronzeStore::new(
            &settings.object_endpoint,
            &settings.object_user,
            &settings.object_pass,
            settings.bronze_bucket(),
        );
        for bucket in &settings.object_buckets {
            bronze.ensure_bucket(bucket).await?;
        }
        tracing::info!("object store ready ({} buckets)", settings.object_buckets.len());

        let pool = warehouse::connect(&settings.warehouse_dsn, settings.warehouse_pool).await?;
        warehouse::run_migrations(&pool).await?;

        let graph = GraphSync::connect(
            &settings.graph_uri,
            &settings.graph_user,
            &settings.graph_pass,
        )
        .await?;
        tracing::info!("graph store connected at {}", settings.graph_uri);

        if let Some(cache) = &settings.cache_uri {
            tracing::info!("cache handle configured at {cache}");
        }

        Ok(Self {
            harvester: Harvester::new(http.clone()),
            http,
            bronze,
            warehouse: pool,
            graph,
            cache_uri: settings.cache_uri.clone(),
        })
    }
}
