use crate::error::ProviderError;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use tracing::debug;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Sample rate the speech model emits when the response does not say otherwise.
pub const TTS_PCM16_SAMPLE_RATE: u32 = 24000;

/// What a request is asking the remote service to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    TextGrading,
    TurnInteraction,
    SpeechSynthesis,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::TextGrading => write!(f, "text-grading"),
            Capability::TurnInteraction => write!(f, "turn-interaction"),
            Capability::SpeechSynthesis => write!(f, "speech-synthesis"),
        }
    }
}

/// A recorded audio segment from the student, as captured by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl AudioClip {
    pub const DEFAULT_MIME_TYPE: &'static str = "audio/webm; codecs=opus";

    pub fn webm(data: Vec<u8>) -> Self {
        Self {
            mime_type: Self::DEFAULT_MIME_TYPE.to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Audio(AudioClip),
}

/// One logical "ask the model" request. The model id is chosen per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub capability: Capability,
    pub system_instruction: Option<String>,
    pub parts: Vec<Part>,
    /// Ask the service to answer with a single JSON object.
    pub expect_json: bool,
}

impl GenerateRequest {
    pub fn json(capability: Capability, parts: Vec<Part>) -> Self {
        Self {
            capability,
            system_instruction: None,
            parts,
            expect_json: true,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }
}

/// Raw speech returned by the synthesis model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechAudio {
    /// Little-endian mono 16-bit PCM samples.
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

/// The narrow call interface onto the remote language/speech service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    /// Runs one content-generation call against `model` and returns its text.
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<String, ProviderError>;

    /// Synthesizes `text` with the given prebuilt voice.
    async fn synthesize(
        &self,
        api_key: &str,
        model: &str,
        voice: &str,
        text: &str,
    ) -> Result<SpeechAudio, ProviderError>;
}

mod gemini_types {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerateContentRequest {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub system_instruction: Option<Content>,
        pub contents: Vec<Content>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub generation_config: Option<GenerationConfig>,
    }
    #[derive(Serialize)]
    pub(super) struct Content {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub role: Option<String>,
        pub parts: Vec<Part>,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum Part {
        Text(String),
        InlineData(Blob),
    }
    #[derive(Serialize, Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        pub mime_type: String,
        pub data: String,
    }
    #[derive(Serialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub response_mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub response_modalities: Option<Vec<ResponseModality>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub speech_config: Option<SpeechConfig>,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Audio,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig {
        pub voice_config: VoiceConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct GenerateContentResponse {
        #[serde(default)]
        pub candidates: Vec<Candidate>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct Candidate {
        pub content: Option<CandidateContent>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct CandidateContent {
        #[serde(default)]
        pub parts: Vec<ResponsePart>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ResponsePart {
        pub text: Option<String>,
        pub inline_data: Option<Blob>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct ErrorEnvelope {
        pub error: ErrorBody,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ErrorBody {
        pub message: String,
        pub status: Option<String>,
    }
}

/// An implementation of `GenerativeClient` for the Gemini REST API.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
}

impl GeminiClient {
    /// Creates a client against `base_url` (e.g. [`DEFAULT_GEMINI_BASE_URL`]).
    ///
    /// No client-level timeout is set; the fallback invoker bounds each attempt.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn post(
        &self,
        api_key: &str,
        model: &str,
        body: &gemini_types::GenerateContentRequest,
    ) -> Result<gemini_types::GenerateContentResponse, ProviderError> {
        let response = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(
                match serde_json::from_str::<gemini_types::ErrorEnvelope>(&text) {
                    Ok(envelope) => ProviderError::http(
                        status.as_u16(),
                        envelope.error.status,
                        envelope.error.message,
                    ),
                    Err(_) => ProviderError::http(status.as_u16(), None, text),
                },
            );
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::new(format!("unreadable response body: {}", e)))
    }
}

fn to_wire_part(part: &Part) -> gemini_types::Part {
    match part {
        Part::Text(text) => gemini_types::Part::Text(text.clone()),
        Part::Audio(clip) => gemini_types::Part::InlineData(gemini_types::Blob {
            mime_type: clip.mime_type.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(&clip.data),
        }),
    }
}

/// Reads `rate=NNNN` out of a mime type like `audio/L16;codec=pcm;rate=24000`.
fn sample_rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
        .filter(|rate| crate::audio::is_supported_sample_rate(*rate))
}

#[async_trait]
impl GenerativeClient for GeminiClient {
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<String, ProviderError> {
        let body = gemini_types::GenerateContentRequest {
            system_instruction: request.system_instruction.as_ref().map(|text| {
                gemini_types::Content {
                    role: None,
                    parts: vec![gemini_types::Part::Text(text.clone())],
                }
            }),
            contents: vec![gemini_types::Content {
                role: Some("user".to_string()),
                parts: request.parts.iter().map(to_wire_part).collect(),
            }],
            generation_config: request.expect_json.then(|| gemini_types::GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                ..Default::default()
            }),
        };

        debug!(model, capability = %request.capability, "Calling generateContent");
        let response = self.post(api_key, model, &body).await?;
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text)
    }

    async fn synthesize(
        &self,
        api_key: &str,
        model: &str,
        voice: &str,
        text: &str,
    ) -> Result<SpeechAudio, ProviderError> {
        let body = gemini_types::GenerateContentRequest {
            system_instruction: None,
            contents: vec![gemini_types::Content {
                role: None,
                parts: vec![gemini_types::Part::Text(text.to_string())],
            }],
            generation_config: Some(gemini_types::GenerationConfig {
                response_modalities: Some(vec![gemini_types::ResponseModality::Audio]),
                speech_config: Some(gemini_types::SpeechConfig {
                    voice_config: gemini_types::VoiceConfig {
                        prebuilt_voice_config: gemini_types::PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                }),
                ..Default::default()
            }),
        };

        debug!(model, voice, "Calling generateContent for speech");
        let response = self.post(api_key, model, &body).await?;
        let blob = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|content| content.parts.into_iter().find_map(|p| p.inline_data))
            .ok_or_else(|| ProviderError::new("No audio generated"))?;

        let pcm = base64::engine::general_purpose::STANDARD
            .decode(&blob.data)
            .map_err(|e| ProviderError::new(format!("audio payload is not base64: {}", e)))?;
        Ok(SpeechAudio {
            pcm,
            sample_rate: sample_rate_from_mime(&blob.mime_type).unwrap_or(TTS_PCM16_SAMPLE_RATE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_from_mime() {
        assert_eq!(
            sample_rate_from_mime("audio/L16;codec=pcm;rate=24000"),
            Some(24000)
        );
        assert_eq!(sample_rate_from_mime("audio/L16; rate=16000"), Some(16000));
        assert_eq!(sample_rate_from_mime("audio/L16"), None);
        assert_eq!(sample_rate_from_mime("audio/L16;rate=abc"), None);
        assert_eq!(sample_rate_from_mime("audio/L16;rate=0"), None);
        assert_eq!(sample_rate_from_mime("audio/L16;rate=3000000000"), None);
        assert_eq!(sample_rate_from_mime("audio/L16;rate=192000"), Some(192000));
    }

    #[test]
    fn test_wire_request_shape() {
        let request = gemini_types::GenerateContentRequest {
            system_instruction: Some(gemini_types::Content {
                role: None,
                parts: vec![gemini_types::Part::Text("be an examiner".into())],
            }),
            contents: vec![gemini_types::Content {
                role: Some("user".into()),
                parts: vec![
                    to_wire_part(&Part::Audio(AudioClip::webm(vec![1, 2, 3]))),
                    to_wire_part(&Part::Text("grade this".into())),
                ],
            }],
            generation_config: Some(gemini_types::GenerationConfig {
                response_mime_type: Some("application/json".into()),
                ..Default::default()
            }),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be an examiner");
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(
            value["contents"][0]["parts"][0]["inlineData"]["mimeType"],
            "audio/webm; codecs=opus"
        );
        assert_eq!(value["contents"][0]["parts"][0]["inlineData"]["data"], "AQID");
        assert_eq!(value["contents"][0]["parts"][1]["text"], "grade this");
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert!(value["generationConfig"].get("speechConfig").is_none());
    }

    #[test]
    fn test_error_envelope_parsing() {
        let body = r#"{"error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}}"#;
        let envelope: gemini_types::ErrorEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.error.status.as_deref(), Some("RESOURCE_EXHAUSTED"));
        assert_eq!(envelope.error.message, "Resource has been exhausted");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = GeminiClient::new("http://localhost:9999/v1beta/");
        assert_eq!(
            client.endpoint("gemini-2.0-flash"),
            "http://localhost:9999/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }
}
