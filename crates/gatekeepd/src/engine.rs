use crate::config::Config;
use gatekeep_core::{
    AccessDecision, AccessDecisionEngine, ArcFaceEncoder, CrnnRecognizer, Detection,
    FaceIdentityMatcher, Frame, FrameError, ModelError, PlateExtractor, RegistryError,
    ScrfdLocator, UserRecord, UserRegistry, YoloPlateDetector,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    InvalidImage(#[from] FrameError),
    #[error("{model} model unavailable: {source}")]
    ModelUnavailable {
        model: &'static str,
        #[source]
        source: ModelError,
    },
    #[error("detection failed: {0}")]
    Detection(#[from] ModelError),
    #[error("registration failed: {0}")]
    Registration(#[from] RegistryError),
    #[error("engine panicked: {0}")]
    Panicked(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Verify {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<AccessDecision, EngineError>>,
    },
    Detect {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<Detection>, EngineError>>,
    },
    Register {
        name: String,
        plate: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<UserRecord, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode an image and decide access for it.
    ///
    /// Only an undecodable image is an `Err`; everything after decoding is
    /// reported inside the decision.
    pub async fn verify(&self, image: Vec<u8>) -> Result<AccessDecision, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Verify { image, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Decode an image and return every face and plate found in it.
    pub async fn detect(&self, image: Vec<u8>) -> Result<Vec<Detection>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Detect { image, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Register a user from a face image.
    pub async fn register(
        &self,
        name: String,
        plate: String,
        image: Vec<u8>,
    ) -> Result<UserRecord, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Register {
            name,
            plate,
            image,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Load all four models and spawn the engine.
///
/// Fails fast if any model is missing or unloadable; the daemon must not
/// start without them.
pub fn spawn_engine(config: &Config, registry: Arc<UserRegistry>) -> Result<EngineHandle, EngineError> {
    let scrfd_path = config.scrfd_model_path();
    let locator = ScrfdLocator::load(&scrfd_path).map_err(unavailable("SCRFD"))?;
    tracing::info!(path = %scrfd_path, "SCRFD locator loaded");

    let arcface_path = config.arcface_model_path();
    let encoder = ArcFaceEncoder::load(&arcface_path).map_err(unavailable("ArcFace"))?;
    tracing::info!(path = %arcface_path, "ArcFace encoder loaded");

    let plate_path = config.plate_model_path();
    let detector = YoloPlateDetector::load(&plate_path).map_err(unavailable("plate detector"))?;
    tracing::info!(path = %plate_path, "plate detector loaded");

    let ocr_path = config.ocr_model_path();
    let recognizer =
        CrnnRecognizer::load(&ocr_path, &config.ocr_charset).map_err(unavailable("plate reader"))?;
    tracing::info!(path = %ocr_path, "plate reader loaded");

    let engine = AccessDecisionEngine::new(
        FaceIdentityMatcher::new(Box::new(locator), Box::new(encoder), config.matcher_config()),
        PlateExtractor::new(Box::new(detector), Box::new(recognizer), config.plate_config()),
        registry,
    );

    spawn_with(engine)
}

fn unavailable(model: &'static str) -> impl FnOnce(ModelError) -> EngineError {
    move |source| EngineError::ModelUnavailable { model, source }
}

/// Run an already-built decision engine on a dedicated OS thread.
///
/// The thread owns the models; requests are served one at a time.
pub fn spawn_with(mut engine: AccessDecisionEngine) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("gatekeep-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Verify { image, reply } => {
                        let result = Frame::decode(&image).map_err(EngineError::from).map(|frame| {
                            guarded(|| engine.decide(&frame)).unwrap_or_else(|e| {
                                tracing::error!(error = %e, "verify panicked");
                                AccessDecision::error(e.to_string())
                            })
                        });
                        let _ = reply.send(result);
                    }
                    EngineRequest::Detect { image, reply } => {
                        let result = Frame::decode(&image).map_err(EngineError::from).and_then(|frame| {
                            guarded(|| engine.detect(&frame))?.map_err(EngineError::from)
                        });
                        let _ = reply.send(result);
                    }
                    EngineRequest::Register {
                        name,
                        plate,
                        image,
                        reply,
                    } => {
                        let result = Frame::decode(&image).map_err(EngineError::from).and_then(|frame| {
                            guarded(|| engine.register(&name, &plate, &frame))?.map_err(EngineError::from)
                        });
                        if let Err(e) = &result {
                            tracing::warn!(user = %name, error = %e, "registration failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Run `f`, turning a panic into an error so one bad request cannot take
/// down the engine thread.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, EngineError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        EngineError::Panicked(msg)
    })
}
