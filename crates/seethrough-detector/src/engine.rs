//! Inference engine: image source in, detection result out

use crate::classifier::{classify, score_from_probability};
use crate::config::{AuxDtype, AuxInputSpec, DetectorConfig};
use crate::fetch::{report, ProgressSink};
use crate::loader::{LoadStatus, ModelHandle, ModelLoader};
use crate::postprocess::extract_probabilities;
use crate::preprocess::{CropRegion, ImagePreprocessor, PreprocessedTensor};
use crate::runtime::{InputTensor, NamedInput};
use crate::source::SourceLoader;
use futures::stream::{self, Stream, StreamExt};
use seethrough_core::{DetectionResult, Error, ImageSource, ModelInfo, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Runs the full detection pipeline against a lazily loaded model
#[derive(Clone)]
pub struct InferenceEngine {
    config: Arc<DetectorConfig>,
    loader: ModelLoader,
    preprocessor: ImagePreprocessor,
    sources: SourceLoader,
}

impl InferenceEngine {
    /// Create an engine with the default ONNX Runtime, HTTP fetcher and disk cache
    pub fn new(config: DetectorConfig) -> Result<Self> {
        let loader = ModelLoader::from_config(&config)?;
        Self::with_loader(config, loader)
    }

    /// Create an engine around an existing loader
    pub fn with_loader(config: DetectorConfig, loader: ModelLoader) -> Result<Self> {
        config.validate()?;
        let sources = SourceLoader::new(Duration::from_secs(config.http_timeout_secs))?;
        Ok(Self {
            preprocessor: ImagePreprocessor::from_spec(&config.input),
            config: Arc::new(config),
            loader,
            sources,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn loader(&self) -> &ModelLoader {
        &self.loader
    }

    /// Load the model ahead of the first request
    pub async fn warm_up(&self, progress: Option<ProgressSink>) -> Result<()> {
        self.loader.load(progress).await.map(|_| ())
    }

    /// Analyze one image
    pub async fn infer(&self, source: &ImageSource) -> Result<DetectionResult> {
        self.run_pipeline(source, None).await
    }

    /// Analyze a rectangle of an image
    pub async fn infer_region(
        &self,
        source: &ImageSource,
        region: CropRegion,
    ) -> Result<DetectionResult> {
        self.run_pipeline(source, Some(region)).await
    }

    /// Prepare a batch job over `sources`. Nothing runs until the job is
    /// streamed or run.
    pub fn batch_infer(&self, sources: Vec<ImageSource>, progress: Option<ProgressSink>) -> BatchJob {
        BatchJob {
            engine: self.clone(),
            sources,
            progress,
        }
    }

    /// Status snapshot for display
    pub fn model_info(&self) -> ModelInfo {
        let handle = self.loader.handle();
        ModelInfo {
            name: self.config.model.name.clone(),
            version: self.config.model.version.clone(),
            loaded: self.loader.status() == LoadStatus::Ready,
            runtime: self.loader.runtime_name().to_string(),
            acceleration: handle.map(|h| h.backend()),
            input_size: format!("{}x{}", self.config.input.width, self.config.input.height),
            classes: self.config.output.classes.clone(),
        }
    }

    /// Version of the model binary in the persistent cache. Unlike
    /// [`model_info`](Self::model_info) this survives process restarts.
    pub async fn cached_model_version(&self) -> Option<String> {
        self.loader.cached_version().await
    }

    /// Release the loaded session; the next request reloads it
    pub fn unload_model(&self) {
        self.loader.unload();
    }

    /// Drop the persisted model binary
    pub async fn clear_cache(&self) -> Result<()> {
        self.loader.clear_cache().await
    }

    async fn run_pipeline(
        &self,
        source: &ImageSource,
        region: Option<CropRegion>,
    ) -> Result<DetectionResult> {
        let started = Instant::now();
        let result = self.detect(source, region, started).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!("seethrough_inferences_total", "outcome" => outcome).increment(1);
        metrics::histogram!("seethrough_inference_latency_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);

        match &result {
            Ok(detection) => debug!(
                "{} scored {} ({}) in {}ms",
                source.describe(),
                detection.ai_score,
                detection.classification(),
                detection.processing_time
            ),
            Err(e) => debug!("{} failed: {}", source.describe(), e),
        }
        result
    }

    async fn detect(
        &self,
        source: &ImageSource,
        region: Option<CropRegion>,
        started: Instant,
    ) -> Result<DetectionResult> {
        let handle = self.loader.load(None).await?;
        let bytes = self.sources.load(source).await?;

        let config = self.config.clone();
        let preprocessor = self.preprocessor.clone();
        let session = handle.clone();
        let outputs = tokio::task::spawn_blocking(move || {
            let tensor = match region {
                Some(region) => preprocessor.preprocess_region(&bytes, region)?,
                None => preprocessor.preprocess_bytes(&bytes)?,
            };
            drop(bytes);
            let inputs = build_inputs(&config, &session, tensor);
            session.run(inputs)
        })
        .await
        .map_err(|e| Error::internal(format!("Inference task failed: {}", e)))??;

        let probabilities = extract_probabilities(&outputs, &self.config.output)?;
        let ai_score = score_from_probability(probabilities.ai);

        Ok(DetectionResult {
            ai_score,
            real_score: score_from_probability(probabilities.real),
            verdict: classify(ai_score),
            probabilities,
            processing_time: started.elapsed().as_millis() as u64,
            model_version: handle.version().to_string(),
        })
    }
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("model", &self.config.model.name)
            .field("loader", &self.loader)
            .finish()
    }
}

/// Assemble the pixel tensor plus the auxiliary inputs the session declares
fn build_inputs(
    config: &DetectorConfig,
    handle: &ModelHandle,
    tensor: PreprocessedTensor,
) -> Vec<NamedInput> {
    let mut inputs = Vec::with_capacity(1 + config.aux_inputs.len());
    let dims = tensor.dims();
    inputs.push(NamedInput::new(
        config.input.name.clone(),
        InputTensor::F32 {
            shape: dims,
            data: tensor.into_data(),
        },
    ));

    for aux in &config.aux_inputs {
        if handle.declares_input(&aux.name) {
            inputs.push(aux_tensor(aux));
        }
    }

    for declared in handle.input_names() {
        if declared != &config.input.name && !config.aux_inputs.iter().any(|a| &a.name == declared) {
            debug!("Model input '{}' has no configured value", declared);
        }
    }

    inputs
}

fn aux_tensor(aux: &AuxInputSpec) -> NamedInput {
    let count = aux.element_count();
    let tensor = match aux.dtype {
        AuxDtype::Int64 => InputTensor::I64 {
            shape: aux.shape.clone(),
            data: vec![aux.fill as i64; count],
        },
        AuxDtype::Float32 => InputTensor::F32 {
            shape: aux.shape.clone(),
            data: vec![aux.fill as f32; count],
        },
    };
    NamedInput::new(aux.name.clone(), tensor)
}

/// One finished item of a batch
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Position in the submitted list
    pub index: usize,
    pub source: ImageSource,
    pub outcome: Result<DetectionResult>,
}

impl BatchItem {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A lazily evaluated batch of inferences
///
/// Items are processed one after another in input order; a failing item is
/// reported and processing continues with the next one. The job can be
/// streamed or run any number of times.
pub struct BatchJob {
    engine: InferenceEngine,
    sources: Vec<ImageSource>,
    progress: Option<ProgressSink>,
}

impl BatchJob {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn sources(&self) -> &[ImageSource] {
        &self.sources
    }

    /// Stream results in input order; progress is reported after each item
    pub fn stream(&self) -> impl Stream<Item = BatchItem> + Send + '_ {
        let total = self.sources.len();
        stream::iter(self.sources.iter().enumerate()).then(move |(index, source)| async move {
            let outcome = self.engine.infer(source).await;
            report(
                self.progress.as_ref(),
                (index + 1) as f32 / total as f32 * 100.0,
            );
            BatchItem {
                index,
                source: source.clone(),
                outcome,
            }
        })
    }

    /// Run every item and collect the results
    pub async fn run(&self) -> Vec<BatchItem> {
        self.stream().collect().await
    }
}

impl std::fmt::Debug for BatchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJob")
            .field("sources", &self.sources.len())
            .finish()
    }
}
