use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use gatekeep_core::{RegistryError, UserRecord, UserRegistry};
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.gatekeep.Gate1";
pub const OBJECT_PATH: &str = "/org/gatekeep/Gate1";

/// D-Bus interface for the gatekeep access-control daemon.
///
/// Bus name: org.gatekeep.Gate1
/// Object path: /org/gatekeep/Gate1
///
/// Images are passed as encoded bytes (JPEG, PNG, ...). Results are JSON strings.
pub struct GateService {
    pub engine: EngineHandle,
    pub registry: Arc<UserRegistry>,
    pub config: Config,
}

#[interface(name = "org.gatekeep.Gate1")]
impl GateService {
    /// Decide whether the person and vehicle in `image` may pass.
    async fn verify_access(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "verify_access requested");
        let decision = self.engine.verify(image).await.map_err(to_fdo)?;
        to_json(&decision)
    }

    /// Every face and plate found in `image`.
    async fn detect(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "detect requested");
        let detections = self.engine.detect(image).await.map_err(to_fdo)?;
        to_json(&serde_json::json!({ "status": "success", "detections": detections }))
    }

    /// Register a user from a face image.
    async fn register_user(
        &self,
        name: &str,
        plate_number: &str,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(user = name, plate = plate_number, "register_user requested");
        let record = self
            .engine
            .register(name.to_string(), plate_number.to_string(), image)
            .await
            .map_err(to_fdo)?;
        tracing::info!(user = %record.name, "user registered");
        to_json(&serde_json::json!({
            "status": "success",
            "message": "User registered successfully",
            "user": record.name,
        }))
    }

    /// Registered users, without their face encodings.
    async fn list_users(&self) -> zbus::fdo::Result<String> {
        to_json(&user_summaries(&self.registry.users()))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let mut status = self.config.status_info();
        status["version"] = env!("CARGO_PKG_VERSION").into();
        status["users"] = self.registry.len().into();
        status["registry"] = self.registry.path().display().to_string().into();
        to_json(&status)
    }
}

fn user_summaries(users: &[UserRecord]) -> serde_json::Value {
    users
        .iter()
        .map(|u| {
            serde_json::json!({
                "name": u.name,
                "plate_number": u.plate_number,
                "registered_at": u.registered_at,
            })
        })
        .collect()
}

/// Bad input is the caller's fault; everything else is ours.
fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::InvalidImage(_) | EngineError::Registration(RegistryError::InvalidName(_)) => {
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        other => {
            tracing::error!(error = %other, "request failed");
            zbus::fdo::Error::Failed(other.to_string())
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}
