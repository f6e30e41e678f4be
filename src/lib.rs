//! Manzai script generation and voice synthesis pipeline.
//!
//! Takes a short topic, asks a local text-generation backend for a
//! two-performer comedy script, renders every line to speech through a
//! two-phase synthesis backend and stores the audio with per-mora timing
//! for lip-sync.
//!
//! Components are constructed explicitly and composed by the caller:
//!
//! ```no_run
//! use manzai_studio::{Pipeline, PipelineOptions, RoleVoiceMap, Studio, StudioConfig};
//!
//! # async fn demo() -> Result<(), manzai_studio::ServiceError> {
//! let studio = Studio::from_config(&StudioConfig::from_env())?;
//! let pipeline = Pipeline::new(studio.generator, studio.synthesizer, PipelineOptions::default());
//! let voices = RoleVoiceMap { tsukkomi: 1, boke: 3 };
//! let _voiced = pipeline.run("猫", "gemma3:4b", &voices).await?;
//! # Ok(())
//! # }
//! ```

mod manzai;

pub use manzai::audio_store::AudioStore;
pub use manzai::audio_types::{AudioRecord, SynthesisResult, TimingEntry, VoiceStyle};
pub use manzai::ollama::{AvailabilityStatus, BackendStatus, OllamaClient};
pub use manzai::pipeline::{
    LineSynthesizer, Pipeline, PipelineOptions, RoleVoiceMap, ScriptSource, VoicedLine,
};
pub use manzai::prompts::PromptStore;
pub use manzai::script::ScriptGenerator;
pub use manzai::types::{
    Role, Script, ScriptLine, ServiceError, StudioConfig, TemplateError,
};
pub use manzai::voicevox::{
    AccentPhrase, AudioQuery, Mora, Speaker, SpeakerStyle, SpeechSynthesizer, SynthStatus,
    VoicevoxClient,
};

/// The constructed component graph: one instance of each service, wired to
/// the same audio directory.
pub struct Studio {
    pub generator: ScriptGenerator,
    pub synthesizer: SpeechSynthesizer,
    pub store: AudioStore,
}

impl Studio {
    pub fn from_config(config: &StudioConfig) -> Result<Self, ServiceError> {
        let store = AudioStore::new(config.audio_dir.clone())?;
        let generator = ScriptGenerator::new(
            OllamaClient::new(&config.ollama_url)?,
            PromptStore::default(),
        );
        let synthesizer = SpeechSynthesizer::new(
            VoicevoxClient::new(&config.voicevox_url)?,
            store.clone(),
        );

        Ok(Self {
            generator,
            synthesizer,
            store,
        })
    }
}
