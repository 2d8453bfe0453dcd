//! Process-wide state shared by the IPC and HTTP front ends.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use vigil_core::{Matcher, PgRegistryStore, RegistryCache, VigilConfig};

use crate::subsystems::dispatcher::{AlertDispatcher, AlertHub, PgRecipientStore};
use crate::subsystems::pipeline::MatchPipeline;
use crate::subsystems::push::create_push_backend;
use crate::subsystems::recorder::{DetectionRecorder, PgCameraDirectory};
use crate::subsystems::reports::{PgReportStore, ReportStore};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: VigilConfig,
    pub pipeline: Arc<MatchPipeline>,
    pub reports: Arc<dyn ReportStore>,
    pub hub: AlertHub,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: VigilConfig,
        pipeline: Arc<MatchPipeline>,
        reports: Arc<dyn ReportStore>,
    ) -> Self {
        let hub = pipeline.dispatcher().hub().clone();
        Self {
            pool,
            config,
            pipeline,
            reports,
            hub,
        }
    }

    /// Wire every collaborator to Postgres.
    pub fn from_pool(pool: PgPool, config: VigilConfig) -> Self {
        let reports: Arc<dyn ReportStore> = Arc::new(PgReportStore::new(pool.clone()));

        let cache = Arc::new(RegistryCache::new(
            Arc::new(PgRegistryStore::new(pool.clone())),
            Duration::from_secs(config.registry.cache_ttl_seconds),
        ));
        let matcher = Matcher::new(cache, config.matching.threshold);
        let recorder = DetectionRecorder::new(
            Arc::new(PgCameraDirectory::new(pool.clone())),
            Arc::clone(&reports),
        );

        let push = if config.alerts.enabled {
            create_push_backend(&config.alerts)
        } else {
            None
        };
        let dispatcher = Arc::new(AlertDispatcher::new(
            AlertHub::new(config.alerts.channel_capacity),
            Arc::new(PgRecipientStore::new(pool.clone())),
            push,
            Arc::clone(&reports),
            Duration::from_millis(config.alerts.notify_timeout_ms),
        ));

        let pipeline = Arc::new(MatchPipeline::new(
            matcher,
            recorder,
            dispatcher,
            config.alerts.enabled,
            config.matching.batch_concurrency,
        ));

        Self::new(pool, config, pipeline, reports)
    }
}
