// Hybrid Masking Orchestrator
// Public entry point: decides per request between the remote detector and the
// local pipeline, consults the result cache and owns the background tasks.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config_store::{AppConfig, EngineConfig, MaskingSettings, SettingsPatch};
use super::connectivity::ConnectivityManager;
use super::debounce::Debouncer;
use super::detection::run_local_pipeline;
use super::remote_client::{HttpRemoteDetector, RemoteDetector, RemoteError, RemoteMaskRequest};
use super::result_cache::{cache_key, ResultCache};
use crate::models::{
    ConnectivityState, EffectiveOptions, EngineStatus, MaskedResult, MaskingMode, MaskingOptions,
    QuickAnalysis, ResultSource,
};

/// Texts shorter than this (in chars, after trimming) are not worth a quick analysis.
pub const QUICK_ANALYZE_MIN_CHARS: usize = 5;

pub struct Orchestrator {
    remote: Arc<dyn RemoteDetector>,
    connectivity: Arc<ConnectivityManager>,
    cache: Arc<ResultCache>,
    settings: RwLock<MaskingSettings>,
    config: EngineConfig,
    debouncer: Debouncer,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Orchestrator talking HTTP to `config.endpoint`.
    pub fn new(config: EngineConfig, settings: MaskingSettings) -> Self {
        let remote = Arc::new(HttpRemoteDetector::new(&config.endpoint));
        Self::with_remote(config, settings, remote)
    }

    pub fn from_app_config(app: &AppConfig) -> Self {
        Self::new(app.engine.clone(), app.settings.clone())
    }

    pub fn with_remote(
        config: EngineConfig,
        settings: MaskingSettings,
        remote: Arc<dyn RemoteDetector>,
    ) -> Self {
        info!(
            "[ORCHESTRATOR] endpoint={} fallback={} cache={} (capacity={}, ttl={}s)",
            remote.endpoint(),
            config.local_fallback,
            config.cache_enabled,
            config.cache_capacity,
            config.cache_ttl_secs
        );

        Self {
            connectivity: Arc::new(ConnectivityManager::new(&config)),
            cache: Arc::new(ResultCache::new(
                config.cache_capacity,
                config.cache_ttl(),
                config.cache_enabled,
            )),
            settings: RwLock::new(settings),
            debouncer: Debouncer::new(config.debounce()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            remote,
            config,
        }
    }

    fn effective_options(settings: &MaskingSettings, options: &MaskingOptions) -> EffectiveOptions {
        let threshold = options
            .threshold
            .map(super::config_store::clamp_threshold)
            .unwrap_or(settings.threshold);
        let mode = options
            .mode
            .as_deref()
            .map(MaskingMode::from_label)
            .unwrap_or(settings.mode);
        EffectiveOptions { threshold, mode }
    }

    /// Mask `text`, remote first with local fallback.
    ///
    /// Never fails: blank input yields an empty result. Masking disabled in
    /// settings, or a remote failure with fallback disabled, yields
    /// `success == false` with `error` set and the input left unmasked.
    pub async fn process(&self, text: &str, options: MaskingOptions) -> MaskedResult {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return MaskedResult::empty(text);
        }

        let settings = self.settings.read().clone();
        if !settings.enabled {
            debug!("[ORCHESTRATOR] masking disabled, passing text through");
            return MaskedResult::disabled(trimmed);
        }

        let opts = Self::effective_options(&settings, &options);
        let key = cache_key(trimmed, &opts);
        // A forced local run only accepts locally produced hits.
        let hit = self
            .cache
            .get(&key)
            .filter(|hit| !options.force_local || hit.source == ResultSource::Local);
        if let Some(hit) = hit {
            debug!("[ORCHESTRATOR] cache hit source={}", hit.source.as_str());
            return hit;
        }

        let started = Instant::now();
        let result = if options.force_local {
            run_local_pipeline(trimmed, &opts)
        } else {
            self.process_remote_first(trimmed, &opts).await
        };

        info!(
            "[ORCHESTRATOR] chars={} source={} masked={}/{} elapsed_ms={}",
            trimmed.chars().count(),
            result.source.as_str(),
            result.stats.masked_entities,
            result.stats.total_entities,
            started.elapsed().as_millis()
        );

        if result.success {
            self.cache.put(key, result.clone());
        }
        result
    }

    async fn process_remote_first(&self, text: &str, opts: &EffectiveOptions) -> MaskedResult {
        let reachable = match self.connectivity.state() {
            ConnectivityState::Unknown => self.connectivity.probe(self.remote.as_ref()).await,
            ConnectivityState::Disconnected if !self.config.local_fallback => {
                self.connectivity.probe(self.remote.as_ref()).await
            }
            state => {
                if self.connectivity.is_stale() {
                    debug!("[ORCHESTRATOR] connectivity state is stale, probing out of band");
                    self.connectivity.spawn_probe(Arc::clone(&self.remote));
                }
                state == ConnectivityState::Connected
            }
        };

        if reachable {
            match self.call_remote(text, opts).await {
                Ok(result) => return result,
                Err(e) => {
                    self.connectivity.mark_disconnected(&e.to_string());
                    if !self.config.local_fallback {
                        return MaskedResult::error(text, format!("Remote detection failed: {}", e));
                    }
                    warn!("[ORCHESTRATOR] remote failed ({}), falling back to local", e);
                }
            }
        } else if !self.config.local_fallback {
            return MaskedResult::error(
                text,
                format!(
                    "Remote detector at {} is unreachable and local fallback is disabled",
                    self.remote.endpoint()
                ),
            );
        }

        run_local_pipeline(text, opts)
    }

    async fn call_remote(&self, text: &str, opts: &EffectiveOptions) -> Result<MaskedResult, RemoteError> {
        let request = RemoteMaskRequest::new(text, opts);
        debug!(
            "[ORCHESTRATOR] remote request_id={} threshold={} mode={}",
            request.request_id, request.threshold, request.mode
        );

        let timeout = self.config.mask_timeout();
        match tokio::time::timeout(timeout, self.remote.mask(&request)).await {
            Ok(Ok(response)) => response.into_masked_result(text),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RemoteError::Timeout(timeout)),
        }
    }

    /// Lightweight risk summary for real-time feedback.
    pub async fn quick_analyze(&self, text: &str) -> QuickAnalysis {
        if text.trim().chars().count() < QUICK_ANALYZE_MIN_CHARS {
            return QuickAnalysis::none();
        }
        let result = self.process(text, MaskingOptions::default()).await;
        QuickAnalysis::from_result(&result)
    }

    /// `quick_analyze` after the debounce delay. Returns `None` when a newer
    /// call superseded this one.
    pub async fn quick_analyze_debounced(&self, text: &str) -> Option<QuickAnalysis> {
        self.debouncer.run(|| self.quick_analyze(text)).await
    }

    /// Merge a settings patch and invalidate cached results.
    pub fn update_settings(&self, patch: &SettingsPatch) -> MaskingSettings {
        let updated = {
            let mut settings = self.settings.write();
            settings.apply(patch);
            settings.clone()
        };
        self.cache.clear();
        info!(
            "[ORCHESTRATOR] settings updated enabled={} threshold={} mode={}",
            updated.enabled,
            updated.threshold,
            updated.mode.as_str()
        );
        updated
    }

    pub fn settings(&self) -> MaskingSettings {
        self.settings.read().clone()
    }

    pub fn get_status(&self) -> EngineStatus {
        let snapshot = self.connectivity.snapshot();
        EngineStatus {
            connected: snapshot.state == ConnectivityState::Connected,
            state: snapshot.state,
            connection_attempts: snapshot.attempts,
            cache_size: self.cache.len(),
            settings: self.settings(),
            endpoint: self.remote.endpoint().to_string(),
            last_checked: snapshot.last_checked,
        }
    }

    /// Reset the attempt budget and probe the remote now.
    pub async fn reconnect(&self) -> bool {
        self.connectivity.reconnect(self.remote.as_ref()).await
    }

    pub fn clear_cache(&self) {
        let size = self.cache.len();
        self.cache.clear();
        info!("[ORCHESTRATOR] cache cleared ({} entries)", size);
    }

    /// Start the periodic health probe and cache sweep. Calling this twice is a no-op.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        tasks.push(self.connectivity.spawn_health_loop(
            Arc::clone(&self.remote),
            self.config.health_interval(),
            self.shutdown.child_token(),
        ));

        let cache = Arc::clone(&self.cache);
        let cancel = self.shutdown.child_token();
        let every = self.config.cache_sweep_interval();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.sweep_expired();
                    }
                }
            }
        }));

        info!(
            "[ORCHESTRATOR] background tasks started (health every {}s, sweep every {}s)",
            self.config.health_interval_secs, self.config.cache_sweep_secs
        );
    }

    /// Stop background tasks and abandon any pending debounced analysis.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.debouncer.cancel();
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("[ORCHESTRATOR] background task ended abnormally: {}", e);
            }
        }
        info!("[ORCHESTRATOR] shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::remote_client::RemoteMaskResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeRemote {
        down: AtomicBool,
        hang_mask: bool,
        mask_calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteDetector for FakeRemote {
        fn endpoint(&self) -> &str {
            "fake://remote"
        }

        async fn health_check(&self) -> Result<(), RemoteError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(RemoteError::ApiError {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(())
        }

        async fn mask(&self, request: &RemoteMaskRequest) -> Result<RemoteMaskResponse, RemoteError> {
            self.mask_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_mask {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(RemoteError::Unsuccessful("service down".to_string()));
            }
            Ok(RemoteMaskResponse {
                success: true,
                original_text: Some(request.text.clone()),
                masked_text: Some("[REMOTE]".to_string()),
                ..Default::default()
            })
        }
    }

    fn orchestrator(remote: Arc<FakeRemote>, config: EngineConfig) -> Orchestrator {
        Orchestrator::with_remote(config, MaskingSettings::default(), remote)
    }

    #[tokio::test]
    async fn test_blank_text_is_empty_result() {
        let remote = Arc::new(FakeRemote::default());
        let orch = orchestrator(remote.clone(), EngineConfig::default());
        let result = orch.process("   \n ", MaskingOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.source, ResultSource::Empty);
        assert!(result.entities.is_empty());
        assert_eq!(remote.mask_calls.load(Ordering::SeqCst), 0);
        assert_eq!(orch.get_status().cache_size, 0);
    }

    #[tokio::test]
    async fn test_remote_result_is_cached() {
        let remote = Arc::new(FakeRemote::default());
        let orch = orchestrator(remote.clone(), EngineConfig::default());

        let first = orch.process("김철수 010-1234-5678", MaskingOptions::default()).await;
        assert_eq!(first.source, ResultSource::Remote);
        assert_eq!(first.masked_text, "[REMOTE]");
        assert!(orch.get_status().connected);

        let second = orch.process("  김철수 010-1234-5678 ", MaskingOptions::default()).await;
        assert_eq!(second.source, ResultSource::Remote);
        assert_eq!(remote.mask_calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.get_status().cache_size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_timeout_falls_back_to_local() {
        let remote = Arc::new(FakeRemote {
            hang_mask: true,
            ..Default::default()
        });
        let orch = orchestrator(remote.clone(), EngineConfig::default());

        let result = orch.process("김철수 010-1234-5678", MaskingOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.source, ResultSource::Local);
        assert_eq!(result.masked_text, "[PERSON] [CONTACT]");
        assert_eq!(orch.get_status().state, ConnectivityState::Disconnected);

        // Disconnected: later calls stay local without touching the remote.
        orch.process("이영희 010-9999-8888", MaskingOptions::default()).await;
        assert_eq!(remote.mask_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_disabled_returns_error_result() {
        let remote = Arc::new(FakeRemote::default());
        remote.down.store(true, Ordering::SeqCst);
        let config = EngineConfig {
            local_fallback: false,
            ..EngineConfig::default()
        };
        let orch = orchestrator(remote, config);

        let text = "김철수 010-1234-5678";
        let result = orch.process(text, MaskingOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.source, ResultSource::Error);
        assert!(result.error.as_deref().unwrap_or("").contains("unreachable"));
        assert_eq!(result.masked_text, text);
        assert_eq!(orch.get_status().cache_size, 0);
    }

    #[tokio::test]
    async fn test_fallback_disabled_remote_mask_failure() {
        let remote = Arc::new(FakeRemote::default());
        let config = EngineConfig {
            local_fallback: false,
            ..EngineConfig::default()
        };
        let orch = orchestrator(remote.clone(), config);
        assert!(orch.reconnect().await);

        remote.down.store(true, Ordering::SeqCst);
        let result = orch.process("김철수 010-1234-5678", MaskingOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or("").contains("service down"));
        assert_eq!(orch.get_status().state, ConnectivityState::Disconnected);
    }

    #[tokio::test]
    async fn test_force_local_skips_remote() {
        let remote = Arc::new(FakeRemote::default());
        let orch = orchestrator(remote.clone(), EngineConfig::default());
        let result = orch
            .process(
                "김철수 010-1234-5678",
                MaskingOptions {
                    force_local: true,
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(result.source, ResultSource::Local);
        assert_eq!(remote.mask_calls.load(Ordering::SeqCst), 0);
        assert_eq!(orch.get_status().state, ConnectivityState::Unknown);
    }

    #[tokio::test]
    async fn test_options_override_settings() {
        let remote = Arc::new(FakeRemote::default());
        let orch = orchestrator(remote, EngineConfig::default());
        let local = MaskingOptions {
            force_local: true,
            ..Default::default()
        };

        let strict = orch
            .process(
                "나이는 45세 입니다",
                MaskingOptions {
                    threshold: Some(0),
                    ..local.clone()
                },
            )
            .await;
        assert_eq!(strict.stats.masked_entities, 1);

        let default = orch.process("나이는 45세 입니다", local).await;
        assert_eq!(default.stats.masked_entities, 0);
    }

    #[tokio::test]
    async fn test_update_settings_clears_cache() {
        let remote = Arc::new(FakeRemote::default());
        let orch = orchestrator(remote, EngineConfig::default());
        orch.process("김철수 010-1234-5678", MaskingOptions::default()).await;
        assert_eq!(orch.get_status().cache_size, 1);

        let updated = orch.update_settings(&SettingsPatch {
            threshold: Some(250),
            mode: Some("general".to_string()),
            ..Default::default()
        });
        assert_eq!(updated.threshold, 100);
        assert_eq!(updated.mode, MaskingMode::General);
        assert_eq!(orch.get_status().cache_size, 0);
        assert_eq!(orch.get_status().settings.threshold, 100);
    }

    #[tokio::test]
    async fn test_disabled_settings_pass_text_through() {
        let remote = Arc::new(FakeRemote::default());
        let orch = orchestrator(remote.clone(), EngineConfig::default());
        orch.update_settings(&SettingsPatch {
            enabled: Some(false),
            ..Default::default()
        });
        let result = orch.process("김철수 010-1234-5678", MaskingOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.source, ResultSource::Disabled);
        assert!(result.error.as_deref().unwrap_or("").contains("disabled"));
        assert_eq!(result.masked_text, "김철수 010-1234-5678");
        assert_eq!(remote.mask_calls.load(Ordering::SeqCst), 0);
        assert_eq!(orch.get_status().cache_size, 0);
    }

    struct MalformedRemote;

    #[async_trait]
    impl RemoteDetector for MalformedRemote {
        fn endpoint(&self) -> &str {
            "fake://malformed"
        }

        async fn health_check(&self) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn mask(&self, _request: &RemoteMaskRequest) -> Result<RemoteMaskResponse, RemoteError> {
            Ok(serde_json::from_str(r#"{"success": true}"#).unwrap())
        }
    }

    #[tokio::test]
    async fn test_malformed_remote_response_falls_back_to_local() {
        let orch = Orchestrator::with_remote(
            EngineConfig::default(),
            MaskingSettings::default(),
            Arc::new(MalformedRemote),
        );
        let result = orch.process("김철수 010-1234-5678", MaskingOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.source, ResultSource::Local);
        assert_eq!(result.masked_text, "[PERSON] [CONTACT]");
        assert_eq!(orch.get_status().state, ConnectivityState::Disconnected);
    }

    #[tokio::test]
    async fn test_malformed_remote_response_without_fallback_is_error() {
        let config = EngineConfig {
            local_fallback: false,
            ..EngineConfig::default()
        };
        let orch = Orchestrator::with_remote(config, MaskingSettings::default(), Arc::new(MalformedRemote));
        let text = "김철수 010-1234-5678";
        let result = orch.process(text, MaskingOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.source, ResultSource::Error);
        assert!(result.error.as_deref().unwrap_or("").contains("masked_text"));
        assert_eq!(orch.get_status().cache_size, 0);
    }

    #[tokio::test]
    async fn test_force_local_ignores_cached_remote_result() {
        let remote = Arc::new(FakeRemote::default());
        let orch = orchestrator(remote.clone(), EngineConfig::default());
        let text = "김철수 010-1234-5678";

        let remote_result = orch.process(text, MaskingOptions::default()).await;
        assert_eq!(remote_result.source, ResultSource::Remote);

        let forced = MaskingOptions {
            force_local: true,
            ..Default::default()
        };
        let local_result = orch.process(text, forced.clone()).await;
        assert_eq!(local_result.source, ResultSource::Local);
        assert_eq!(local_result.masked_text, "[PERSON] [CONTACT]");

        let again = orch.process(text, forced).await;
        assert_eq!(again.source, ResultSource::Local);
        assert_eq!(remote.mask_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_quick_analyze() {
        let remote = Arc::new(FakeRemote::default());
        remote.down.store(true, Ordering::SeqCst);
        let orch = orchestrator(remote, EngineConfig::default());

        assert_eq!(orch.quick_analyze("김철수").await, QuickAnalysis::none());

        let analysis = orch.quick_analyze("김철수 010-1234-5678").await;
        assert!(analysis.has_risk);
        assert_eq!(analysis.entity_count, 2);
        assert_eq!(analysis.risk_level, 100.0);
        assert!(analysis.error.is_none());

        assert!(!orch.quick_analyze("hello world").await.has_risk);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_disconnected_state_probes_out_of_band() {
        let remote = Arc::new(FakeRemote::default());
        let orch = orchestrator(remote.clone(), EngineConfig::default());
        orch.connectivity.record_failure("initial");

        tokio::time::advance(Duration::from_secs(31)).await;
        let result = orch.process("김철수 010-1234-5678", MaskingOptions::default()).await;
        assert_eq!(result.source, ResultSource::Local);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(orch.get_status().state, ConnectivityState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_tasks_start_and_shutdown() {
        let remote = Arc::new(FakeRemote::default());
        let orch = orchestrator(remote, EngineConfig::default());
        orch.start_background_tasks();
        orch.start_background_tasks();
        assert_eq!(orch.tasks.lock().len(), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(orch.get_status().connected);

        orch.shutdown().await;
        assert!(orch.tasks.lock().is_empty());
    }
}
