//! Wiring of the engine components around one set of collaborators.

use std::sync::Arc;

use revbench_tools::{
    AutotoolsBuild, BuildTool, Engine, GitRepo, InstalledEngine, PerfStat, Profiler,
    VersionControl,
};

use crate::bisect::Bisector;
use crate::cache::BuildCache;
use crate::config::HarnessConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::evaluator::{EvalPolicy, Evaluator};
use crate::runner::{Runner, Workload};
use crate::store::MetricStore;

pub struct Harness {
    config: HarnessConfig,
    evaluator: Arc<Evaluator>,
}

impl Harness {
    /// Real collaborators: git, autotools, `<engine> --version` and
    /// `perf stat`.
    pub fn from_config(config: HarnessConfig) -> Result<Self> {
        let vcs = Arc::new(Self::source_repo(&config));
        let builder = Arc::new(AutotoolsBuild::new(&config.source_dir));
        let profiler = Arc::new(PerfStat::new(config.perf_binary.clone()));
        Self::with_collaborators(config, vcs, builder, Arc::new(InstalledEngine), profiler)
    }

    /// The source checkout. Installs and the metric log kept inside it
    /// survive `clean`.
    pub fn source_repo(config: &HarnessConfig) -> GitRepo {
        GitRepo::new(&config.source_dir)
            .preserving(&config.install_root)
            .preserving(&config.data_file)
    }

    pub fn with_collaborators(
        config: HarnessConfig,
        vcs: Arc<dyn VersionControl>,
        builder: Arc<dyn BuildTool>,
        engine: Arc<dyn Engine>,
        profiler: Arc<dyn Profiler>,
    ) -> Result<Self> {
        let policy = EvalPolicy::from_config(&config)?;
        let store = Arc::new(MetricStore::open(&config.data_file)?);
        let cache = Arc::new(BuildCache::new(
            &config.install_root,
            config.binary_names.clone(),
            config.build.clone(),
            vcs.clone(),
            builder,
            engine,
        ));
        let workload = Workload::new(config.captures.clone(), config.scripts.clone());
        let evaluator = Arc::new(Evaluator::new(
            vcs,
            cache,
            Runner::new(profiler),
            store,
            workload,
            policy,
        ));
        Ok(Self { config, evaluator })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn evaluator(&self) -> Arc<Evaluator> {
        self.evaluator.clone()
    }

    pub fn bisector(&self) -> Bisector {
        Bisector::new(self.evaluator.clone())
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.evaluator.clone())
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        self.evaluator.store()
    }

    pub fn cache(&self) -> &Arc<BuildCache> {
        self.evaluator.cache()
    }

    pub fn vcs(&self) -> &Arc<dyn VersionControl> {
        self.evaluator.vcs()
    }
}
