//! Opinion producer backed by an OpenAI-compatible chat completions endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::collaborators::OpinionProducer;
use crate::domain::error::{AuditError, Result};
use crate::domain::evidence::EvidenceMap;
use crate::domain::opinion::{Persona, RawResponse};
use crate::domain::rubric::Criterion;

/// Posts `{criterion_id, persona, evidence}` and returns the reply text
/// unvalidated.
pub struct HttpOpinionProducer {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpOpinionProducer {
    pub fn new(endpoint: String, model: String, api_key: Option<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("tribunal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuditError::Collaborator(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            endpoint,
            model,
            api_key,
            http_client,
        })
    }

    fn request_body(&self, criterion: &Criterion, persona: Persona, evidence: &EvidenceMap) -> Value {
        let system = format!(
            "You are the {persona} judge and argue from a {} stance. Reply with one JSON object: \
             {{\"criterion_id\": string, \"score\": integer 1-5, \"rationale\": string, \
             \"cited_evidence\": [evidence ids]}}.",
            persona.stance()
        );
        let user = json!({
            "criterion_id": criterion.id,
            "criterion": criterion.display_name(),
            "persona": persona,
            "evidence": evidence,
        });
        json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user.to_string()},
            ],
        })
    }
}

#[async_trait]
impl OpinionProducer for HttpOpinionProducer {
    async fn produce(
        &self,
        criterion: &Criterion,
        persona: Persona,
        evidence: &EvidenceMap,
    ) -> Result<RawResponse> {
        let mut request = self
            .http_client
            .post(&self.endpoint)
            .json(&self.request_body(criterion, persona, evidence));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuditError::Collaborator(format!("opinion request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuditError::Collaborator(format!(
                "opinion endpoint returned {status}"
            )));
        }
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AuditError::Collaborator(format!("unreadable opinion response: {e}")))?;
        debug!(criterion = %criterion.id, persona = %persona, "opinion response received");

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AuditError::Collaborator("opinion response has no content".to_string()))?;
        Ok(RawResponse::Text(text))
    }
}
