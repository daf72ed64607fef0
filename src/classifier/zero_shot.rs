//! Zero-shot classifier over a hosted inference endpoint.
//!
//! Speaks the HuggingFace zero-shot-classification wire format: POST the
//! content with `candidate_labels`, get parallel `labels`/`scores` arrays
//! back. The default model is `facebook/bart-large-mnli`.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::classifier::{Classifier, LabelScore};
use crate::config::ClassifierConfig;
use crate::error::ClassifierError;

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters<'a>,
}

#[derive(Serialize)]
struct InferenceParameters<'a> {
    candidate_labels: &'a [String],
    multi_label: bool,
}

#[derive(Deserialize)]
struct InferenceResponse {
    labels: Vec<String>,
    scores: Vec<f64>,
}

/// HTTP zero-shot classifier.
pub struct ZeroShotClassifier {
    config: ClassifierConfig,
    client: reqwest::Client,
}

impl ZeroShotClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClassifierError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Classifier for ZeroShotClassifier {
    async fn classify(
        &self,
        content: &str,
        labels: &[String],
    ) -> Result<Vec<LabelScore>, ClassifierError> {
        if content.is_empty() || labels.is_empty() {
            return Ok(Vec::new());
        }

        let body = InferenceRequest {
            inputs: content,
            parameters: InferenceParameters {
                candidate_labels: labels,
                // Labels are independent rules, not a single-choice set.
                multi_label: true,
            },
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(self.config.api_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifierError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: InferenceResponse =
            response
                .json()
                .await
                .map_err(|e| ClassifierError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        if parsed.labels.len() != parsed.scores.len() {
            return Err(ClassifierError::InvalidResponse {
                reason: format!(
                    "label/score length mismatch: {} vs {}",
                    parsed.labels.len(),
                    parsed.scores.len()
                ),
            });
        }

        Ok(parsed
            .labels
            .into_iter()
            .zip(parsed.scores)
            .map(|(label, score)| LabelScore { label, score })
            .collect())
    }
}
