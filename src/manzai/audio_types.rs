use serde::{Deserialize, Serialize};

use std::time::SystemTime;

/// Timing of one mora in the rendered audio, for lip-sync. Entries form a
/// contiguous sequence: the first starts at 0 and each subsequent entry
/// starts exactly where the previous one ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingEntry {
    pub start_time: f32,
    pub end_time: f32,
    pub text: String,
}

/// Everything a caller needs after one line has been voiced: the stored
/// audio's filename, the per-mora timing and the total duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub audio_ref: String,
    pub timing: Vec<TimingEntry>,
    pub duration: f32,
    pub text: String,
    pub voice_id: u32,
}

/// One stored audio file. The directory listing is the only index; records
/// are built from it on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRecord {
    pub filename: String,
    pub created_at: SystemTime,
    pub size_bytes: u64,
}

/// One selectable voice, flattened from the backend's speaker/style tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStyle {
    pub id: u32,
    pub name: String,
}
