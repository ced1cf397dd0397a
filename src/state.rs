//! Process-wide shared state, modeled as a single object instead of
//! scattered statics (§9 Re-architectures required).

use std::sync::Arc;

use crate::changebus::ChangeBus;
use crate::config::Config;
use crate::path_mapper::PathMapper;
use crate::subscribe::RateLimiter;
use crate::watcher::WatcherRegistry;

#[derive(Clone)]
pub struct AppState(Arc<Inner>);

struct Inner {
    config: Config,
    mapper: PathMapper,
    bus: Arc<ChangeBus>,
    watcher: Arc<WatcherRegistry>,
    rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let mapper = PathMapper::new(config.root.clone());
        let bus = ChangeBus::new();
        let watcher = WatcherRegistry::new(mapper.clone(), Arc::clone(&bus));

        Self(Arc::new(Inner {
            config,
            mapper,
            bus,
            watcher,
            rate_limiter: RateLimiter::new(),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.0.mapper
    }

    pub fn bus(&self) -> &Arc<ChangeBus> {
        &self.0.bus
    }

    pub fn watcher(&self) -> &Arc<WatcherRegistry> {
        &self.0.watcher
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.0.rate_limiter
    }
}
