//! The hosted generative-image model: diagram enhancement and text-to-diagram generation.

use std::{env, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config,
    datauri::{DataUri, DataUriError, PNG},
};

const ENHANCE_INSTRUCTION: &str = "You are an assistant that redraws hand-drawn diagrams so they \
look clean and precise.

You are given a diagram as an image. Redraw it: fix imperfections, straighten lines and make the \
shapes regular, while keeping its structure and labels. Respond with the redrawn diagram as an \
image.";

const GENERATE_INSTRUCTION: &str = "You are an assistant that produces clear, professional \
diagrams from text descriptions such as flowcharts, mind maps or architecture diagrams.
Create a clean, simple diagram for the user's description, using standard shapes and clear \
connecting lines. Output the diagram as a PNG image.";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no API key set (looked in {})", .0.join(", "))]
    MissingApiKey(Vec<String>),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Transport(String),
    #[error("unreadable response: {0}")]
    Response(#[from] std::io::Error),
    #[error("invalid image payload: {0}")]
    Payload(#[from] DataUriError),
}

/// The two model calls the whiteboard makes.
///
/// `Ok(None)` means the model answered without an image.
pub trait DiagramService: Send + Sync {
    fn enhance(&self, diagram: &DataUri) -> Result<Option<DataUri>, ServiceError>;

    fn generate(&self, prompt: &str) -> Result<Option<DataUri>, ServiceError>;
}

/// Client for the Google Generative Language REST API.
pub struct GoogleAi {
    agent: ureq::Agent,
    endpoint: String,
    enhance_model: String,
    generate_model: String,
    api_key_env: Vec<String>,
}

impl GoogleAi {
    pub fn new(config: &config::Service) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            agent,
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
            enhance_model: config.enhance_model.clone(),
            generate_model: config.generate_model.clone(),
            api_key_env: config.api_key_env.clone(),
        }
    }

    /// Fails if none of the configured environment variables holds a key.
    pub fn check_api_key(&self) -> Result<(), ServiceError> {
        self.api_key().map(drop)
    }

    fn api_key(&self) -> Result<String, ServiceError> {
        self.api_key_env
            .iter()
            .find_map(|var| env::var(var).ok().filter(|key| !key.is_empty()))
            .ok_or_else(|| ServiceError::MissingApiKey(self.api_key_env.clone()))
    }

    fn call<Req, Resp>(&self, model: &str, method: &str, body: &Req) -> Result<Resp, ServiceError>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/v1beta/models/{model}:{method}", self.endpoint);
        log::debug!("POST {url}");
        let response = self
            .agent
            .post(&url)
            .set("x-goog-api-key", &self.api_key()?)
            .send_json(body);
        match response {
            Ok(response) => Ok(response.into_json()?),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(ServiceError::Status {
                    status,
                    message: api_error_message(&body),
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(ServiceError::Transport(transport.to_string()))
            }
        }
    }
}

impl DiagramService for GoogleAi {
    fn enhance(&self, diagram: &DataUri) -> Result<Option<DataUri>, ServiceError> {
        let request = GenerateContentRequest::enhance(diagram);
        let response: GenerateContentResponse =
            self.call(&self.enhance_model, "generateContent", &request)?;
        response.into_image()
    }

    fn generate(&self, prompt: &str) -> Result<Option<DataUri>, ServiceError> {
        let request = PredictRequest::generate(prompt);
        let response: PredictResponse = self.call(&self.generate_model, "predict", &request)?;
        response.into_image()
    }
}

/// Pulls the human-readable message out of an API error body, if it has one.
fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body.trim().to_owned(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    Text(&'a str),
    InlineData(Blob<'a>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

impl<'a> GenerateContentRequest<'a> {
    fn enhance(diagram: &'a DataUri) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::InlineData(Blob {
                        mime_type: diagram.mime(),
                        data: diagram.base64(),
                    }),
                    Part::Text(ENHANCE_INSTRUCTION),
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE"],
            },
            safety_settings: [
                ("HARM_CATEGORY_HATE_SPEECH", "BLOCK_ONLY_HIGH"),
                ("HARM_CATEGORY_DANGEROUS_CONTENT", "BLOCK_NONE"),
                ("HARM_CATEGORY_HARASSMENT", "BLOCK_MEDIUM_AND_ABOVE"),
                ("HARM_CATEGORY_SEXUALLY_EXPLICIT", "BLOCK_LOW_AND_ABOVE"),
            ]
            .into_iter()
            .map(|(category, threshold)| SafetySetting {
                category,
                threshold,
            })
            .collect(),
        }
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl GenerateContentResponse {
    fn into_image(self) -> Result<Option<DataUri>, ServiceError> {
        let inline = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| {
                content
                    .parts
                    .into_iter()
                    .find_map(|part| part.inline_data)
            });
        match inline {
            Some(InlineData { mime_type, data }) if !data.is_empty() => {
                Ok(Some(DataUri::from_base64(mime_type, &data)?))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Serialize)]
struct PredictRequest {
    instances: Vec<PredictInstance>,
    parameters: PredictParameters,
}

#[derive(Serialize)]
struct PredictInstance {
    prompt: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
}

impl PredictRequest {
    fn generate(prompt: &str) -> Self {
        Self {
            instances: vec![PredictInstance {
                prompt: format!("{GENERATE_INSTRUCTION}\n\nPrompt: \"{prompt}\""),
            }],
            parameters: PredictParameters { sample_count: 1 },
        }
    }
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

impl PredictResponse {
    fn into_image(self) -> Result<Option<DataUri>, ServiceError> {
        let Some(prediction) = self.predictions.into_iter().next() else {
            return Ok(None);
        };
        match prediction.bytes_base64_encoded {
            Some(data) if !data.is_empty() => {
                let mime = prediction.mime_type.unwrap_or_else(|| PNG.to_owned());
                Ok(Some(DataUri::from_base64(mime, &data)?))
            }
            _ => Ok(None),
        }
    }
}
