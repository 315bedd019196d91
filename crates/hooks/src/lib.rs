pub mod config;
pub mod engine;
pub mod module;
pub mod pipeline;
pub mod registry;

pub use config::{ConfigError, DEFAULT_CONFIG_PATH, EngineConfig, load_config};
pub use engine::{DispatchOutcome, HookEngine};
pub use module::{
    HookPoint, IpFilter, OutQueryContext, OutQueryHook, PolicyModule, PolicyModuleBuilder,
    QueryHook, TagClassifier, TagDecision, TagQuery,
};
pub use pipeline::{PipelineOutcome, QueryAnswer, QueryPipeline, ResolvedAnswer, Resolver};
pub use registry::{LoadError, ModuleRegistry, global};
