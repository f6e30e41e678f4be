use super::audio_store::AudioStore;
use super::audio_types::{SynthesisResult, TimingEntry, VoiceStyle};
use super::types::ServiceError;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Cursor;
use std::time::Duration;

const BACKEND: &str = "voicevox";
const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sampling rate of the backend's default WAV output; the fallback audio
/// uses the same container parameters.
const FALLBACK_SAMPLE_RATE: u32 = 24_000;

/// Synthesis descriptor returned by the query phase and posted back verbatim
/// for rendering. Only the fields needed for timing are typed; everything
/// else the backend sent is captured in `rest` so the round trip is
/// lossless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioQuery {
    pub accent_phrases: Vec<AccentPhrase>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccentPhrase {
    pub moras: Vec<Mora>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mora {
    pub text: String,
    #[serde(default)]
    pub consonant_length: Option<f32>,
    pub vowel_length: f32,
    pub pitch: f32,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Speaker {
    pub name: String,
    pub styles: Vec<SpeakerStyle>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeakerStyle {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SynthStatus {
    pub available: bool,
    pub speaker_count: usize,
    pub version: Option<String>,
    pub error: Option<String>,
}

/// Client for the speech-synthesis backend's two-phase API.
pub struct VoicevoxClient {
    client: reqwest::Client,
    base_url: String,
}

impl VoicevoxClient {
    pub fn new(base_url: &str) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(SYNTHESIS_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::backend(BACKEND, "init", e))?;

        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ServiceError::InvalidInput(
                "voicevox base URL is required".to_string(),
            ));
        }

        tracing::debug!(base_url = %base_url, "voicevox client ready");
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query phase: ask the backend for the synthesis descriptor of `text`.
    pub async fn audio_query(&self, text: &str, voice_id: u32) -> Result<AudioQuery, ServiceError> {
        let url = format!("{}/audio_query", self.base_url);
        let speaker = voice_id.to_string();
        let response = self
            .client
            .post(url)
            .query(&[("text", text), ("speaker", speaker.as_str())])
            .send()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "audio_query", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "audio_query", e))?;

        if !status.is_success() {
            return Err(ServiceError::backend_status(BACKEND, "audio_query", status, body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ServiceError::Parse(format!("synthesis descriptor: {e}")))
    }

    /// Render phase: post the full descriptor back and receive audio bytes.
    pub async fn synthesis(
        &self,
        query: &AudioQuery,
        voice_id: u32,
    ) -> Result<Vec<u8>, ServiceError> {
        let url = format!("{}/synthesis", self.base_url);
        let response = self
            .client
            .post(url)
            .query(&[("speaker", voice_id)])
            .json(query)
            .send()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "synthesis", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::backend_status(BACKEND, "synthesis", status, body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "synthesis", e))?;
        Ok(bytes.to_vec())
    }

    pub async fn speakers(&self) -> Result<Vec<Speaker>, ServiceError> {
        let url = format!("{}/speakers", self.base_url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "speakers", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "speakers", e))?;

        if !status.is_success() {
            return Err(ServiceError::backend_status(BACKEND, "speakers", status, body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ServiceError::Parse(format!("speaker listing: {e}")))
    }

    pub async fn version(&self) -> Result<String, ServiceError> {
        let url = format!("{}/version", self.base_url);
        let response = self
            .client
            .get(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "version", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "version", e))?;

        if !status.is_success() {
            return Err(ServiceError::backend_status(BACKEND, "version", status, body));
        }

        Ok(body.trim().trim_matches('"').to_string())
    }

    pub async fn check_availability(&self) -> SynthStatus {
        let version = match self.version().await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "voicevox availability probe failed");
                return SynthStatus {
                    available: false,
                    speaker_count: 0,
                    version: None,
                    error: Some(e.to_string()),
                };
            }
        };

        match self.speakers().await {
            Ok(speakers) => SynthStatus {
                available: true,
                speaker_count: speakers.len(),
                version,
                error: None,
            },
            Err(e) => SynthStatus {
                available: false,
                speaker_count: 0,
                version,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Two-phase synthesis plus persistence: query for the descriptor, derive
/// per-mora timing from it, render, store the audio.
pub struct SpeechSynthesizer {
    client: VoicevoxClient,
    store: AudioStore,
}

impl SpeechSynthesizer {
    pub fn new(client: VoicevoxClient, store: AudioStore) -> Self {
        Self { client, store }
    }

    pub fn client(&self) -> &VoicevoxClient {
        &self.client
    }

    pub fn store(&self) -> &AudioStore {
        &self.store
    }

    /// The query step alone, for callers that only need timing.
    pub async fn timing_data(&self, text: &str, voice_id: u32) -> Result<AudioQuery, ServiceError> {
        validate_input(text, voice_id)?;
        self.client.audio_query(text.trim(), voice_id).await
    }

    /// Query then render, without persisting.
    pub async fn synthesize(&self, text: &str, voice_id: u32) -> Result<Vec<u8>, ServiceError> {
        validate_input(text, voice_id)?;
        let query = self.client.audio_query(text.trim(), voice_id).await?;
        self.client.synthesis(&query, voice_id).await
    }

    /// The full per-line operation: descriptor, timing, audio, storage.
    pub async fn synthesize_with_timing(
        &self,
        text: &str,
        voice_id: u32,
        base_name: &str,
    ) -> Result<SynthesisResult, ServiceError> {
        validate_input(text, voice_id)?;
        let text = text.trim();

        let query = self.client.audio_query(text, voice_id).await?;
        let (timing, duration) = build_timing(&query);

        let audio = self.client.synthesis(&query, voice_id).await?;
        let audio_ref = self.store.save(&audio, base_name)?;

        tracing::info!(voice_id, moras = timing.len(), duration = f64::from(duration), file = %audio_ref, "line synthesized");
        Ok(SynthesisResult {
            audio_ref,
            timing,
            duration,
            text: text.to_string(),
            voice_id,
        })
    }

    /// Every selectable voice, one row per style.
    pub async fn list_voices(&self) -> Result<Vec<VoiceStyle>, ServiceError> {
        let speakers = self.client.speakers().await?;
        Ok(flatten_voices(speakers))
    }

    /// Deterministic ~1 second of silence in the backend's container format,
    /// so callers can always hand back something playable.
    pub fn fallback_audio(&self, text: &str) -> Vec<u8> {
        tracing::warn!(text, "using fallback audio");
        silent_wav(Duration::from_secs(1))
    }
}

fn validate_input(text: &str, voice_id: u32) -> Result<(), ServiceError> {
    if text.trim().is_empty() {
        return Err(ServiceError::InvalidInput(
            "text cannot be empty".to_string(),
        ));
    }
    if voice_id == 0 {
        return Err(ServiceError::InvalidInput(
            "voice id must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

/// Flatten all moras across accent phrases into contiguous timing entries
/// by running-offset accumulation. Returns the entries and the total
/// duration (the last entry's end time).
fn build_timing(query: &AudioQuery) -> (Vec<TimingEntry>, f32) {
    let mut entries = Vec::new();
    let mut position = 0.0f32;

    for phrase in &query.accent_phrases {
        for mora in &phrase.moras {
            let length = mora.consonant_length.unwrap_or(0.0) + mora.vowel_length;
            entries.push(TimingEntry {
                start_time: position,
                end_time: position + length,
                text: mora.text.clone(),
            });
            position += length;
        }
    }

    (entries, position)
}

fn flatten_voices(speakers: Vec<Speaker>) -> Vec<VoiceStyle> {
    speakers
        .into_iter()
        .flat_map(|speaker| {
            speaker
                .styles
                .into_iter()
                .filter(|style| style.id > 0)
                .map(move |style| VoiceStyle {
                    id: style.id as u32,
                    name: format!("{} ({})", speaker.name, style.name),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn silent_wav(duration: Duration) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: FALLBACK_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let num_samples = (FALLBACK_SAMPLE_RATE as f64 * duration.as_secs_f64()) as u32;
    let mut cursor = Cursor::new(Vec::new());
    let result = (|| -> Result<(), hound::Error> {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for _ in 0..num_samples {
            writer.write_sample(0i16)?;
        }
        writer.finalize()
    })();

    if let Err(e) = result {
        tracing::error!(error = %e, "silent wav encoding failed");
        return Vec::new();
    }
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(json: &str) -> AudioQuery {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_timing_is_contiguous_from_zero() {
        let query = descriptor(
            r#"{
                "accent_phrases": [
                    {"moras": [
                        {"text": "コ", "consonant_length": 0.1, "vowel_length": 0.2, "pitch": 5.0},
                        {"text": "ン", "consonant_length": null, "vowel_length": 0.15, "pitch": 5.1}
                    ]},
                    {"moras": [
                        {"text": "ニ", "consonant_length": 0.05, "vowel_length": 0.1, "pitch": 5.2}
                    ]}
                ],
                "speedScale": 1.0
            }"#,
        );

        let (timing, duration) = build_timing(&query);
        assert_eq!(timing.len(), 3);
        assert_eq!(timing[0].start_time, 0.0);
        for entry in &timing {
            assert!(entry.end_time > entry.start_time);
        }
        for pair in timing.windows(2) {
            assert_eq!(pair[1].start_time, pair[0].end_time);
        }
        assert!((timing[0].end_time - 0.3).abs() < 1e-6);
        assert_eq!(duration, timing[2].end_time);
        assert!((duration - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_timing_of_empty_descriptor() {
        let query = descriptor(r#"{"accent_phrases": []}"#);
        let (timing, duration) = build_timing(&query);
        assert!(timing.is_empty());
        assert_eq!(duration, 0.0);
    }

    #[test]
    fn test_descriptor_round_trip_keeps_unknown_fields() {
        let raw = r#"{
            "accent_phrases": [
                {"moras": [
                    {"text": "ア", "consonant_length": null, "vowel_length": 0.2, "pitch": 5.0, "vowel": "a"}
                ], "accent": 1, "pause_mora": null}
            ],
            "speedScale": 1.0,
            "outputSamplingRate": 24000,
            "kana": "ア"
        }"#;
        let query = descriptor(raw);
        let back = serde_json::to_value(&query).unwrap();

        assert_eq!(back["speedScale"], 1.0);
        assert_eq!(back["outputSamplingRate"], 24000);
        assert_eq!(back["kana"], "ア");
        assert_eq!(back["accent_phrases"][0]["accent"], 1);
        assert_eq!(back["accent_phrases"][0]["moras"][0]["vowel"], "a");
    }

    #[test]
    fn test_flatten_voices_drops_zero_ids() {
        let speakers: Vec<Speaker> = serde_json::from_str(
            r#"[
                {"name": "四国めたん", "styles": [{"id": 2, "name": "ノーマル"}, {"id": 0, "name": "不明"}]},
                {"name": "ずんだもん", "styles": [{"id": 3, "name": "ノーマル"}]}
            ]"#,
        )
        .unwrap();

        let voices = flatten_voices(speakers);
        assert_eq!(
            voices,
            vec![
                VoiceStyle {
                    id: 2,
                    name: "四国めたん (ノーマル)".to_string()
                },
                VoiceStyle {
                    id: 3,
                    name: "ずんだもん (ノーマル)".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_fallback_audio_is_one_second_of_silence() {
        let bytes = silent_wav(Duration::from_secs(1));
        let reader = hound::WavReader::new(Cursor::new(&bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, FALLBACK_SAMPLE_RATE);
        assert_eq!(reader.len(), FALLBACK_SAMPLE_RATE);

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_input_validation() {
        assert!(matches!(
            validate_input("  ", 1),
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_input("こんにちは", 0),
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(validate_input("こんにちは", 1).is_ok());
    }
}
