//! Process-wide landmark extractor, loaded at most once.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::Instrument;
use visaphoto_core::{ExtractorError, LandmarkExtractor, OnnxLandmarkExtractor};

use crate::pipeline::StepError;

type Loader = dyn Fn() -> Result<Arc<dyn LandmarkExtractor>, ExtractorError> + Send + Sync;

/// Lazily loaded, shared extractor handle.
///
/// Concurrent first callers wait on a single load. The load runs in its own
/// task, so a caller that gives up (timeout, dropped request) does not cancel
/// it; the result lands in the cell for the next caller. A failed load is not
/// cached, so a later request retries it (e.g. after models are installed).
#[derive(Clone)]
pub struct SharedExtractor {
    cell: Arc<OnceCell<Arc<dyn LandmarkExtractor>>>,
    loader: Arc<Loader>,
}

impl SharedExtractor {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn LandmarkExtractor>, ExtractorError> + Send + Sync + 'static,
    {
        Self {
            cell: Arc::new(OnceCell::new()),
            loader: Arc::new(loader),
        }
    }

    /// ONNX models from `model_dir`, loaded on first use.
    pub fn onnx(model_dir: PathBuf) -> Self {
        Self::new(move || {
            let extractor = OnnxLandmarkExtractor::load(&model_dir)?;
            Ok(Arc::new(extractor) as Arc<dyn LandmarkExtractor>)
        })
    }

    /// An extractor that is already constructed.
    pub fn ready(extractor: Arc<dyn LandmarkExtractor>) -> Self {
        Self {
            cell: Arc::new(OnceCell::new_with(Some(extractor.clone()))),
            loader: Arc::new(move || Ok(extractor.clone())),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<Arc<dyn LandmarkExtractor>, StepError> {
        if let Some(extractor) = self.cell.get() {
            return Ok(extractor.clone());
        }
        let cell = self.cell.clone();
        let loader = self.loader.clone();
        let load = tokio::spawn(async move {
            cell.get_or_try_init(move || async move {
                tracing::info!("loading landmark models");
                let loaded = tokio::task::spawn_blocking(move || loader()).await??;
                tracing::info!("landmark models loaded");
                Ok::<_, StepError>(loaded)
            })
            .await
            .cloned()
        }
        .in_current_span());
        load.await?
    }
}
