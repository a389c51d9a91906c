use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use presence_core::{
    FaceMatcher, LandmarkError, LandmarkProvider, LivenessConfig, LivenessError, LivenessEvaluator,
    LivenessVerdict, MatchError, MatchVerdict, MediaBackend, OnnxFaceMesh, SFaceMatcher,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("liveness error: {0}")]
    Liveness(#[from] LivenessError),
    #[error("matcher error: {0}")]
    Match(#[from] MatchError),
    #[error("landmark model error: {0}")]
    Landmarks(#[source] LandmarkError),
    #[error("engine request timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Model instances owned by the engine thread.
pub struct Models {
    /// `None` only when liveness is disabled by configuration.
    pub landmarks: Option<Box<dyn LandmarkProvider>>,
    pub matcher: Box<dyn FaceMatcher>,
}

/// Load the ONNX models named by `config`.
///
/// The face mesh is mandatory: the matcher locates faces with it, so a
/// missing or corrupt mesh fails startup. The landmark provider for
/// liveness is a second session over the same file and is skipped when
/// liveness is disabled, leaving the evaluator to its bypass policy.
pub fn load_models(config: &Config) -> Result<Models, EngineError> {
    let mesh_path = config.face_mesh_model_path();
    let sface_path = config.sface_model_path();
    let matcher = SFaceMatcher::load(
        &mesh_path,
        &sface_path,
        config.matcher.distance_metric,
        config.matcher.threshold,
    )?;
    tracing::info!(
        path = %sface_path,
        metric = config.matcher.distance_metric.as_str(),
        threshold = config.matcher.effective_threshold(),
        "SFace matcher loaded"
    );

    let landmarks: Option<Box<dyn LandmarkProvider>> = if config.liveness.enabled {
        let mesh = OnnxFaceMesh::load(&mesh_path).map_err(EngineError::Landmarks)?;
        tracing::info!(path = %mesh_path, "face mesh landmark model loaded");
        Some(Box::new(mesh))
    } else {
        tracing::warn!("liveness disabled by configuration; landmark model not loaded");
        None
    };

    Ok(Models {
        landmarks,
        matcher: Box::new(matcher),
    })
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Liveness {
        video: Option<PathBuf>,
        reply: oneshot::Sender<Result<LivenessVerdict, EngineError>>,
    },
    Match {
        reference: PathBuf,
        probe: PathBuf,
        reply: oneshot::Sender<Result<MatchVerdict, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Run the liveness evaluator over the staged selfie video, if any.
    pub async fn evaluate_liveness(&self, video: Option<PathBuf>) -> Result<LivenessVerdict, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.call(
            EngineRequest::Liveness {
                video,
                reply: reply_tx,
            },
            reply_rx,
        )
        .await
    }

    /// Compare the face on the reference document with the probe selfie.
    pub async fn match_faces(&self, reference: PathBuf, probe: PathBuf) -> Result<MatchVerdict, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.call(
            EngineRequest::Match {
                reference,
                probe,
                reply: reply_tx,
            },
            reply_rx,
        )
        .await
    }

    async fn call<T>(
        &self,
        request: EngineRequest,
        reply_rx: oneshot::Receiver<Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        let exchange = async {
            self.tx
                .send(request)
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns every model instance and serves one request at a time,
/// so inference never needs to be shared across threads.
pub fn spawn_engine(
    models: Models,
    media: Arc<dyn MediaBackend>,
    liveness: LivenessConfig,
    timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let Models {
        mut landmarks,
        mut matcher,
    } = models;

    std::thread::Builder::new()
        .name("presence-engine".into())
        .spawn(move || {
            tracing::info!(landmarks = landmarks.is_some(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Liveness { video, reply } => {
                        let evaluator = LivenessEvaluator::new(&liveness, media.as_ref());
                        let provider = landmarks
                            .as_deref_mut()
                            .map(|p| p as &mut dyn LandmarkProvider);
                        let result = evaluator
                            .evaluate(video.as_deref(), provider)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Match {
                        reference,
                        probe,
                        reply,
                    } => {
                        let result = matcher
                            .verify(&reference, &probe)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, timeout })
}
