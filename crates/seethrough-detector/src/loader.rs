//! Model lifecycle: cache lookup, download, session construction
//!
//! The loader moves through `Unloaded -> Loading -> Ready` and back to
//! `Unloaded` on failure or explicit unload. While a load is in flight every
//! caller awaits the same shared future, so the binary is fetched and the
//! session is built at most once no matter how many requests arrive.
//!
//! The load runs on its own task and installs its result itself, so it
//! completes even when every caller waiting on it has gone away. At most one
//! load task exists at a time: an unload issued mid-load marks the running
//! load for disposal instead of abandoning it.

use crate::cache::{DiskModelCache, ModelCache};
use crate::config::{DetectorConfig, ModelLocation};
use crate::fetch::{report, HttpModelFetcher, ModelFetcher, ProgressSink};
use crate::onnx::OrtRuntime;
use crate::runtime::{InferenceRuntime, InferenceSession, NamedInput, SessionOutputs};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use seethrough_core::{Backend, Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A shared reference to an initialized inference session
pub struct ModelHandle {
    session: RwLock<Option<Arc<dyn InferenceSession>>>,
    backend: Backend,
    input_names: Vec<String>,
    output_names: Vec<String>,
    version: String,
    from_cache: bool,
}

impl ModelHandle {
    pub fn new(session: Box<dyn InferenceSession>, version: impl Into<String>, from_cache: bool) -> Self {
        let session: Arc<dyn InferenceSession> = Arc::from(session);
        Self {
            backend: session.backend(),
            input_names: session.input_names().to_vec(),
            output_names: session.output_names().to_vec(),
            session: RwLock::new(Some(session)),
            version: version.into(),
            from_cache,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn declares_input(&self, name: &str) -> bool {
        self.input_names.iter().any(|n| n == name)
    }

    /// Model version the session was built from
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether the session was built from cached bytes
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn is_disposed(&self) -> bool {
        self.session.read().is_none()
    }

    /// Run one forward pass. Blocking.
    pub fn run(&self, inputs: Vec<NamedInput>) -> Result<SessionOutputs> {
        let session = self
            .session
            .read()
            .clone()
            .ok_or_else(|| Error::inference("session disposed"))?;
        session.run(inputs)
    }

    /// Release the session. Runs already in progress finish; later runs fail.
    pub fn dispose(&self) {
        self.session.write().take();
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("backend", &self.backend)
            .field("inputs", &self.input_names)
            .field("outputs", &self.output_names)
            .field("version", &self.version)
            .field("from_cache", &self.from_cache)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<ModelHandle>>>>;

enum LoadState {
    Unloaded,
    Loading {
        generation: u64,
        future: SharedLoad,
        // Set by `unload()`; the handle is disposed when the load finishes
        discard: bool,
    },
    Ready(Arc<ModelHandle>),
}

struct StateCell {
    load: LoadState,
    generation: u64,
}

/// Observable loader status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Unloaded,
    Loading,
    Ready,
}

struct LoaderInner {
    location: ModelLocation,
    version: String,
    cache_key: String,
    runtime: Arc<dyn InferenceRuntime>,
    fetcher: Arc<dyn ModelFetcher>,
    cache: Option<Arc<dyn ModelCache>>,
    state: Mutex<StateCell>,
}

/// Owns the load state of one model
#[derive(Clone)]
pub struct ModelLoader {
    inner: Arc<LoaderInner>,
}

/// Builder for [`ModelLoader`]
pub struct ModelLoaderBuilder {
    location: ModelLocation,
    version: String,
    cache_key: Option<String>,
    runtime: Arc<dyn InferenceRuntime>,
    fetcher: Arc<dyn ModelFetcher>,
    cache: Option<Arc<dyn ModelCache>>,
}

impl ModelLoaderBuilder {
    /// Attach a persistent cache
    pub fn cache(mut self, cache: Arc<dyn ModelCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the key the binary is cached under
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn build(self) -> ModelLoader {
        let cache_key = self
            .cache_key
            .unwrap_or_else(|| self.location.canonical());
        ModelLoader {
            inner: Arc::new(LoaderInner {
                location: self.location,
                version: self.version,
                cache_key,
                runtime: self.runtime,
                fetcher: self.fetcher,
                cache: self.cache,
                state: Mutex::new(StateCell {
                    load: LoadState::Unloaded,
                    generation: 0,
                }),
            }),
        }
    }
}

impl ModelLoader {
    pub fn builder(
        location: ModelLocation,
        version: impl Into<String>,
        runtime: Arc<dyn InferenceRuntime>,
        fetcher: Arc<dyn ModelFetcher>,
    ) -> ModelLoaderBuilder {
        ModelLoaderBuilder {
            location,
            version: version.into(),
            cache_key: None,
            runtime,
            fetcher,
            cache: None,
        }
    }

    /// Create a loader without a persistent cache
    pub fn new(
        location: ModelLocation,
        version: impl Into<String>,
        runtime: Arc<dyn InferenceRuntime>,
        fetcher: Arc<dyn ModelFetcher>,
    ) -> Self {
        Self::builder(location, version, runtime, fetcher).build()
    }

    /// Build a loader from configuration with the ONNX Runtime backend,
    /// the HTTP fetcher and (if enabled) the disk cache
    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        let runtime = Arc::new(OrtRuntime::new(config.runtime.clone()));
        let fetcher = Arc::new(HttpModelFetcher::new(Duration::from_secs(
            config.http_timeout_secs,
        ))?);

        let mut builder = Self::builder(
            config.model.location.clone(),
            config.model.version.clone(),
            runtime,
            fetcher,
        )
        .cache_key(config.cache_key());

        if config.cache.enabled {
            builder = builder.cache(Arc::new(DiskModelCache::new(&config.cache.dir)));
        }
        Ok(builder.build())
    }

    pub fn cache_key(&self) -> &str {
        &self.inner.cache_key
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    pub fn runtime_name(&self) -> &str {
        self.inner.runtime.name()
    }

    pub fn status(&self) -> LoadStatus {
        match self.inner.state.lock().load {
            LoadState::Unloaded => LoadStatus::Unloaded,
            LoadState::Loading { discard: true, .. } => LoadStatus::Unloaded,
            LoadState::Loading { .. } => LoadStatus::Loading,
            LoadState::Ready(_) => LoadStatus::Ready,
        }
    }

    /// The ready handle, if any, without triggering a load
    pub fn handle(&self) -> Option<Arc<ModelHandle>> {
        match &self.inner.state.lock().load {
            LoadState::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Return the ready handle, joining or starting a load as needed.
    ///
    /// Only the caller that starts a load has its progress sink driven;
    /// callers joining an in-flight load just wait for its outcome. A load
    /// cancelled by [`unload`](Self::unload) is awaited to completion before
    /// a fresh one starts.
    pub async fn load(&self, progress: Option<ProgressSink>) -> Result<Arc<ModelHandle>> {
        loop {
            let (future, discarded) = {
                let mut state = self.inner.state.lock();
                let in_flight = match &state.load {
                    LoadState::Ready(handle) => return Ok(handle.clone()),
                    LoadState::Loading {
                        future, discard, ..
                    } => Some((future.clone(), *discard)),
                    LoadState::Unloaded => None,
                };

                match in_flight {
                    Some(joined) => {
                        debug!("Joining in-flight model load");
                        joined
                    }
                    None => (self.start_load(&mut state, progress.clone()), false),
                }
            };

            if discarded {
                debug!("Waiting for a cancelled model load to finish");
                let _ = future.await;
                continue;
            }

            match future.await {
                // Unloaded while this caller waited
                Ok(handle) if handle.is_disposed() => continue,
                outcome => return outcome,
            }
        }
    }

    fn start_load(&self, state: &mut StateCell, progress: Option<ProgressSink>) -> SharedLoad {
        state.generation += 1;
        let generation = state.generation;

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = inner.load_model(progress).await;
            inner.finish_load(generation, &result);
            result
        });

        let future = task
            .map(|joined| {
                joined.unwrap_or_else(|e| Err(Error::internal(format!("Model load task failed: {}", e))))
            })
            .boxed()
            .shared();

        state.load = LoadState::Loading {
            generation,
            future: future.clone(),
            discard: false,
        };
        future
    }

    /// Dispose the ready session and return to `Unloaded`.
    ///
    /// A load in flight keeps running to completion; its session is then
    /// disposed instead of installed, and callers waiting on it start a
    /// fresh load.
    pub fn unload(&self) {
        let mut state = self.inner.state.lock();
        match std::mem::replace(&mut state.load, LoadState::Unloaded) {
            LoadState::Ready(handle) => {
                handle.dispose();
                info!("Model unloaded");
            }
            LoadState::Loading {
                generation, future, ..
            } => {
                state.load = LoadState::Loading {
                    generation,
                    future,
                    discard: true,
                };
                info!("Model load in flight will be discarded on completion");
            }
            LoadState::Unloaded => {}
        }
    }

    /// Version of the binary held in the persistent cache, if any
    pub async fn cached_version(&self) -> Option<String> {
        let cache = self.inner.cache.as_ref()?;
        match cache.lookup(&self.inner.cache_key).await {
            Ok(blob) => blob.map(|b| b.version),
            Err(e) => {
                debug!("Model cache lookup failed: {}", e);
                None
            }
        }
    }

    /// Drop every persisted binary. The loaded session (if any) is kept.
    pub async fn clear_cache(&self) -> Result<()> {
        match &self.inner.cache {
            Some(cache) => {
                cache.clear().await?;
                info!("Model cache cleared");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLoader")
            .field("cache_key", &self.inner.cache_key)
            .field("version", &self.inner.version)
            .field("status", &self.status())
            .finish()
    }
}

impl LoaderInner {
    /// Install the outcome of load `generation`, or dispose it if the load
    /// was cancelled
    fn finish_load(&self, generation: u64, result: &Result<Arc<ModelHandle>>) {
        let mut state = self.state.lock();
        let discard = match &state.load {
            LoadState::Loading {
                generation: current,
                discard,
                ..
            } if *current == generation => *discard,
            _ => true,
        };

        if discard {
            if let Ok(handle) = result {
                handle.dispose();
                debug!("Disposed session from a cancelled load");
            }
            if matches!(&state.load, LoadState::Loading { generation: current, .. } if *current == generation) {
                state.load = LoadState::Unloaded;
            }
            return;
        }

        state.load = match result {
            Ok(handle) => LoadState::Ready(handle.clone()),
            Err(_) => LoadState::Unloaded,
        };
    }

    async fn load_model(&self, progress: Option<ProgressSink>) -> Result<Arc<ModelHandle>> {
        let started = Instant::now();
        info!("Loading model {} (version {})", self.cache_key, self.version);

        match self.fetch_and_build(progress).await {
            Ok(handle) => {
                info!(
                    "Model ready on {} in {}ms (from cache: {})",
                    handle.backend(),
                    started.elapsed().as_millis(),
                    handle.from_cache()
                );
                Ok(handle)
            }
            Err(e) => {
                warn!("Model load failed: {}", e);
                Err(e.into_model_load())
            }
        }
    }

    async fn fetch_and_build(&self, progress: Option<ProgressSink>) -> Result<Arc<ModelHandle>> {
        if let Some(bytes) = self.cached_bytes().await {
            match self.build_handle(bytes, true).await {
                Ok(handle) => {
                    report(progress.as_ref(), 100.0);
                    return Ok(handle);
                }
                Err(e) => {
                    warn!("Cached model is unusable, evicting: {}", e);
                    self.evict().await;
                }
            }
        }

        let bytes = self.fetcher.fetch(&self.location, progress).await?;
        let handle = self.build_handle(bytes.clone(), false).await?;
        self.persist(bytes).await;
        Ok(handle)
    }

    async fn cached_bytes(&self) -> Option<Bytes> {
        let cache = self.cache.as_ref()?;
        match cache.lookup(&self.cache_key).await {
            Ok(Some(blob)) if blob.version == self.version => {
                metrics::counter!("seethrough_model_cache_total", "result" => "hit").increment(1);
                debug!("Model cache hit ({} bytes)", blob.bytes.len());
                Some(blob.bytes)
            }
            Ok(Some(blob)) => {
                metrics::counter!("seethrough_model_cache_total", "result" => "stale").increment(1);
                info!(
                    "Cached model version {} does not match {}, refetching",
                    blob.version, self.version
                );
                None
            }
            Ok(None) => {
                metrics::counter!("seethrough_model_cache_total", "result" => "miss").increment(1);
                None
            }
            Err(e) => {
                metrics::counter!("seethrough_model_cache_total", "result" => "error").increment(1);
                warn!("Model cache lookup failed, treating as miss: {}", e);
                self.evict().await;
                None
            }
        }
    }

    async fn evict(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove(&self.cache_key).await {
                warn!("Failed to evict cached model: {}", e);
            }
        }
    }

    async fn persist(&self, bytes: Bytes) {
        if let Some(cache) = &self.cache {
            match cache.store(&self.cache_key, bytes, &self.version).await {
                Ok(()) => debug!("Model binary cached under {}", self.cache_key),
                Err(e) => warn!("Failed to cache model binary: {}", e),
            }
        }
    }

    async fn build_handle(&self, bytes: Bytes, from_cache: bool) -> Result<Arc<ModelHandle>> {
        let runtime = self.runtime.clone();
        let session = tokio::task::spawn_blocking(move || runtime.create_session(&bytes))
            .await
            .map_err(|e| Error::internal(format!("Session task failed: {}", e)))??;
        Ok(Arc::new(ModelHandle::new(session, self.version.clone(), from_cache)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::OutputTensor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedSession;

    impl InferenceSession for FixedSession {
        fn input_names(&self) -> &[String] {
            &[]
        }

        fn output_names(&self) -> &[String] {
            &[]
        }

        fn backend(&self) -> Backend {
            Backend::Cpu
        }

        fn run(&self, _inputs: Vec<NamedInput>) -> Result<SessionOutputs> {
            let mut outputs = SessionOutputs::new();
            outputs.insert(
                "probs".to_string(),
                OutputTensor {
                    shape: vec![1, 2],
                    data: vec![0.5, 0.5],
                },
            );
            Ok(outputs)
        }
    }

    struct FixedRuntime;

    impl InferenceRuntime for FixedRuntime {
        fn name(&self) -> &str {
            "fixed"
        }

        fn create_session(&self, _model: &[u8]) -> Result<Box<dyn InferenceSession>> {
            Ok(Box::new(FixedSession))
        }
    }

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelFetcher for CountingFetcher {
        async fn fetch(&self, _location: &ModelLocation, _progress: Option<ProgressSink>) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"model"))
        }
    }

    fn loader(fetcher: Arc<CountingFetcher>) -> ModelLoader {
        ModelLoader::new(
            ModelLocation::Url {
                url: "https://models.example.com/m.onnx".to_string(),
            },
            "1.0.0",
            Arc::new(FixedRuntime),
            fetcher,
        )
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let loader = loader(Arc::new(CountingFetcher::default()));
        assert_eq!(loader.status(), LoadStatus::Unloaded);
        assert!(loader.handle().is_none());

        loader.load(None).await.unwrap();
        assert_eq!(loader.status(), LoadStatus::Ready);
        assert!(loader.handle().is_some());

        loader.unload();
        assert_eq!(loader.status(), LoadStatus::Unloaded);
    }

    #[tokio::test]
    async fn test_dispose_invalidates_clones() {
        let loader = loader(Arc::new(CountingFetcher::default()));
        let handle = loader.load(None).await.unwrap();
        assert!(handle.run(Vec::new()).is_ok());

        loader.unload();
        assert!(handle.is_disposed());
        let err = handle.run(Vec::new()).unwrap_err();
        assert!(err.is_session_disposed());
    }

    #[tokio::test]
    async fn test_builders_keep_settings() {
        let loader = ModelLoader::builder(
            ModelLocation::Local {
                path: "/models/m.onnx".into(),
            },
            "1.0.0",
            Arc::new(FixedRuntime),
            Arc::new(CountingFetcher::default()),
        )
        .cache_key("custom-key")
        .build();
        assert_eq!(loader.cache_key(), "custom-key");
        assert_eq!(loader.version(), "1.0.0");
        assert_eq!(loader.runtime_name(), "fixed");
    }
}
