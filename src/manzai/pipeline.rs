use super::audio_types::{SynthesisResult, TimingEntry};
use super::script::ScriptGenerator;
use super::types::{Role, Script, ServiceError};
use super::voicevox::SpeechSynthesizer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Seam over script generation so the orchestrator can be driven without a
/// live generation backend.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    async fn generate(&self, topic: &str, model_id: &str) -> Result<Script, ServiceError>;
    fn fallback_script(&self, topic: &str) -> Script;
}

#[async_trait]
impl ScriptSource for ScriptGenerator {
    async fn generate(&self, topic: &str, model_id: &str) -> Result<Script, ServiceError> {
        ScriptGenerator::generate(self, topic, model_id).await
    }

    fn fallback_script(&self, topic: &str) -> Script {
        ScriptGenerator::fallback_script(self, topic)
    }
}

/// Seam over per-line synthesis and persistence.
#[async_trait]
pub trait LineSynthesizer: Send + Sync {
    async fn synthesize_with_timing(
        &self,
        text: &str,
        voice_id: u32,
        base_name: &str,
    ) -> Result<SynthesisResult, ServiceError>;
}

#[async_trait]
impl LineSynthesizer for SpeechSynthesizer {
    async fn synthesize_with_timing(
        &self,
        text: &str,
        voice_id: u32,
        base_name: &str,
    ) -> Result<SynthesisResult, ServiceError> {
        SpeechSynthesizer::synthesize_with_timing(self, text, voice_id, base_name).await
    }
}

/// Which voice each of the two roles speaks with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoleVoiceMap {
    pub tsukkomi: u32,
    pub boke: u32,
}

impl RoleVoiceMap {
    pub fn voice_for(&self, role: Role) -> u32 {
        match role {
            Role::Tsukkomi => self.tsukkomi,
            Role::Boke => self.boke,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Substitute the canned apology script when generation fails with a
    /// backend or parse error, instead of propagating. Off by default: a
    /// script without real content has little value.
    pub use_fallback_script: bool,
}

/// One fully voiced line of the output, in script order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoicedLine {
    pub role: Role,
    pub text: String,
    pub audio_ref: String,
    pub timing: Vec<TimingEntry>,
}

/// Composes script generation and speech synthesis: topic in, fully voiced
/// script out.
pub struct Pipeline<G, S> {
    generator: G,
    synthesizer: S,
    options: PipelineOptions,
}

impl<G: ScriptSource, S: LineSynthesizer> Pipeline<G, S> {
    pub fn new(generator: G, synthesizer: S, options: PipelineOptions) -> Self {
        Self {
            generator,
            synthesizer,
            options,
        }
    }

    /// Run the whole pipeline. Lines are voiced in script order and the
    /// first synthesis failure aborts the run: a script with silently
    /// missing audio is worse than a failed request.
    pub async fn run(
        &self,
        topic: &str,
        model_id: &str,
        voices: &RoleVoiceMap,
    ) -> Result<Vec<VoicedLine>, ServiceError> {
        let script = match self.generator.generate(topic, model_id).await {
            Ok(script) => script,
            Err(e @ (ServiceError::BackendUnavailable { .. } | ServiceError::Parse(_)))
                if self.options.use_fallback_script =>
            {
                tracing::warn!(error = %e, topic, "generation failed, using fallback script");
                self.generator.fallback_script(topic)
            }
            Err(e) => return Err(e),
        };

        let mut voiced = Vec::with_capacity(script.lines.len());
        for (index, line) in script.lines.iter().enumerate() {
            let voice_id = voices.voice_for(line.role);
            let base_name = format!("{}_{}", line.role, index);

            let result = self
                .synthesizer
                .synthesize_with_timing(&line.text, voice_id, &base_name)
                .await?;

            voiced.push(VoicedLine {
                role: line.role,
                text: line.text.clone(),
                audio_ref: result.audio_ref,
                timing: result.timing,
            });
        }

        tracing::info!(topic, lines = voiced.len(), "pipeline run complete");
        Ok(voiced)
    }
}
