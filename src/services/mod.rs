// Privacy Guard Core Services
// Config, remote client, connectivity, caching and orchestration around the
// local detection pipeline.

pub mod config_store;
pub mod connectivity;
pub mod debounce;
pub mod detection;
pub mod orchestrator;
pub mod remote_client;
pub mod result_cache;

pub use config_store::*;
pub use connectivity::{ConnectivityManager, ConnectivitySnapshot};
pub use debounce::Debouncer;
pub use orchestrator::{Orchestrator, QUICK_ANALYZE_MIN_CHARS};
pub use remote_client::*;
pub use result_cache::{cache_key, ResultCache};

// Re-export detection module functions
pub use detection::{
    mask,
    resolve,
    run_local_pipeline,
    score,
    detect,
};
