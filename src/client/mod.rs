use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{Codec, Json};
use crate::runtime::{InstanceSnapshot, Runtime, WaitError};
use crate::samples::SampleOrchestration;
use crate::{Event, Result};

/// Status-polling handle returned from a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStatusResponse {
    pub id: String,
    pub orchestration: String,
    pub status_query_get_uri: String,
    pub terminate_post_uri: String,
}

impl CheckStatusResponse {
    fn for_instance(id: String, orchestration: &str) -> Self {
        Self {
            status_query_get_uri: format!("/instances/{id}"),
            terminate_post_uri: format!("/instances/{id}/terminate"),
            orchestration: orchestration.to_string(),
            id,
        }
    }
}

/// Thin client for control-plane operations.
///
/// Everything goes through the runtime's instance manager; the client adds
/// the trigger boundary (type name to orchestration) and typed inputs.
#[derive(Clone)]
pub struct Client {
    runtime: Arc<Runtime>,
}

impl Client {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Start an orchestration instance with string input.
    pub async fn start_orchestration(&self, orchestration: &str, input: impl Into<String>) -> Result<String> {
        self.runtime.start_orchestration(orchestration, input).await
    }

    /// Start an orchestration with typed input (serialized to JSON).
    pub async fn start_orchestration_typed<In: Serialize>(&self, orchestration: &str, input: &In) -> Result<String> {
        let payload = Json::encode(input)?;
        self.runtime.start_orchestration(orchestration, payload).await
    }

    /// Trigger entry point. `trigger` is the requested type: a sample name,
    /// or `"FOFI"` for fan-out/fan-in. Anything else runs the chain sample.
    pub async fn start_from_trigger(
        &self,
        trigger: Option<&str>,
        input: impl Into<String>,
    ) -> Result<CheckStatusResponse> {
        let orchestration = SampleOrchestration::from_trigger(trigger);
        let id = self.runtime.start_orchestration(orchestration.name(), input).await?;
        Ok(CheckStatusResponse::for_instance(id, orchestration.name()))
    }

    pub async fn get_status(&self, instance: &str) -> Result<InstanceSnapshot> {
        self.runtime.get_status(instance).await
    }

    pub async fn terminate(&self, instance: &str, reason: impl Into<String>) -> Result<()> {
        self.runtime.terminate(instance, reason).await
    }

    pub async fn wait_for_completion(
        &self,
        instance: &str,
        timeout: Duration,
    ) -> std::result::Result<InstanceSnapshot, WaitError> {
        self.runtime.wait_for_orchestration(instance, timeout).await
    }

    pub async fn get_history(&self, instance: &str) -> Result<Vec<Event>> {
        self.runtime.get_history(instance).await
    }
}
