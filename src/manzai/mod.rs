pub mod audio_store;
pub mod audio_types;
pub mod ollama;
pub mod pipeline;
pub mod prompts;
pub mod script;
pub mod types;
pub mod voicevox;
