pub mod compression;
pub mod config;
pub mod links;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod storage;
pub mod testing;
pub mod workload;

pub use compression::{CompressionBackend, CompressionConfig, ConverterError, FfmpegBackend};
pub use config::{
    load_config, load_config_from_str, validate_config, ConfigError, SanitizedSettings, Settings,
};
pub use links::{DocumentStore, FsDocumentStore, LinkRewriter, RewriteError};
pub use pipeline::{AbortHandle, MigrationPipeline, PipelineError, PipelineEvent, PipelineState, RunSummary};
pub use progress::{ProgressState, ProgressWeights};
pub use storage::{build_storage, ObjectStorage, StorageError};
pub use workload::{discover, DiscoveryError, MediaKind, Stage, WorkItem, Workload};
