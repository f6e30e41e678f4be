use super::ollama::OllamaClient;
use super::prompts::PromptStore;
use super::types::{Role, Script, ScriptLine, ServiceError};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawScript {
    script: Vec<RawLine>,
}

#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(default)]
    speaker: String,
    #[serde(default)]
    text: String,
}

/// Turns a topic into a structured manzai script via the generation backend.
pub struct ScriptGenerator {
    client: OllamaClient,
    prompts: PromptStore,
}

impl ScriptGenerator {
    pub fn new(client: OllamaClient, prompts: PromptStore) -> Self {
        Self { client, prompts }
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    /// Generate a script for `topic` with the named model.
    ///
    /// Validates the topic, confirms the backend and model are reachable,
    /// runs one generation call and extracts the dialogue from whatever
    /// shape the model answered in.
    pub async fn generate(&self, topic: &str, model_id: &str) -> Result<Script, ServiceError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ServiceError::InvalidInput(
                "topic cannot be empty".to_string(),
            ));
        }

        let status = self.client.check_availability().await;
        if !status.available {
            return Err(ServiceError::BackendUnavailable {
                backend: "ollama",
                phase: "models",
                message: status
                    .error
                    .unwrap_or_else(|| "all model listing endpoints failed".to_string()),
            });
        }

        if !status.models.iter().any(|m| m == model_id) {
            return Err(ServiceError::ModelUnavailable {
                model: model_id.to_string(),
                available: status.models,
            });
        }

        let prompt = self.prompts.load_template("manzai_prompt", &[("topic", topic)])?;

        tracing::info!(topic, model = model_id, "generating manzai script");
        let raw = self.client.generate(model_id, &prompt).await?;

        let lines = extract_script_lines(&raw)?;
        tracing::info!(line_count = lines.len(), "script generated");

        Ok(Script {
            topic: topic.to_string(),
            lines,
        })
    }

    /// Canned two-line apology script. Deterministic, never fails; callers
    /// use it when a degraded answer beats no answer.
    pub fn fallback_script(&self, topic: &str) -> Script {
        fallback_script(topic)
    }
}

pub fn fallback_script(topic: &str) -> Script {
    Script {
        topic: topic.to_string(),
        lines: vec![
            ScriptLine {
                role: Role::Tsukkomi,
                text: format!("申し訳ありません。{topic}についての漫才を生成できませんでした。"),
            },
            ScriptLine {
                role: Role::Boke,
                text: "また後で試してみましょう。".to_string(),
            },
        ],
    }
}

/// Extraction fallback chain over the raw model output. Strategies run in
/// order; the first one yielding at least one usable line wins.
fn extract_script_lines(raw: &str) -> Result<Vec<ScriptLine>, ServiceError> {
    // Fenced block explicitly tagged as JSON.
    if let Some(block) = fenced_json_block(raw) {
        if let Some(lines) = parse_script_object(block) {
            if !lines.is_empty() {
                return Ok(lines);
            }
        }
    }

    // First '{' to the matching last '}' of the whole text.
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Some(lines) = parse_script_object(&raw[start..=end]) {
                if !lines.is_empty() {
                    return Ok(lines);
                }
            }
        }
    }

    // The whole response as the object itself.
    if let Some(lines) = parse_script_object(raw) {
        if !lines.is_empty() {
            return Ok(lines);
        }
    }

    // Line-oriented "A: ..." / "B: ..." dialogue.
    let lines = parse_script_text(raw);
    if !lines.is_empty() {
        return Ok(lines);
    }

    let excerpt: String = raw.chars().take(200).collect();
    Err(ServiceError::Parse(format!(
        "no extraction strategy produced a usable line | output: {excerpt}"
    )))
}

fn fenced_json_block(text: &str) -> Option<&str> {
    let after_tag = text.split_once("```json")?.1;
    let block = after_tag.split_once("```")?.0;
    Some(block.trim())
}

/// Parse a `{"script": [{"speaker", "text"}, ...]}` object. `None` when the
/// input is not that object at all; `Some` with the usable lines otherwise.
fn parse_script_object(text: &str) -> Option<Vec<ScriptLine>> {
    let raw: RawScript = serde_json::from_str(text.trim()).ok()?;

    let lines = raw
        .script
        .into_iter()
        .filter_map(|item| {
            let speaker = item.speaker.trim();
            let text = item.text.trim();
            if speaker.is_empty() || text.is_empty() {
                return None;
            }
            // "A" is the straight man; any other speaker tag is the funny man.
            let role = role_for_code(speaker).unwrap_or(Role::Boke);
            Some(ScriptLine {
                role,
                text: text.to_string(),
            })
        })
        .collect();

    Some(lines)
}

/// Line-oriented fallback: `code: text` per line, codes resolved through the
/// fixed role table, anything unrecognized skipped. A fenced code block is
/// unwrapped first so dialogue inside one still parses.
fn parse_script_text(text: &str) -> Vec<ScriptLine> {
    let mut text = text;
    if text.contains("```") {
        let blocks: Vec<&str> = text.split("```").collect();
        for (i, block) in blocks.iter().enumerate() {
            if i % 2 == 1 && !block.trim().is_empty() {
                text = *block;
                break;
            }
        }
    }

    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (code, content) = line.split_once(':')?;
            let content = content.trim();
            if content.is_empty() {
                return None;
            }
            let role = role_for_code(code.trim())?;
            Some(ScriptLine {
                role,
                text: content.to_string(),
            })
        })
        .collect()
}

fn role_for_code(code: &str) -> Option<Role> {
    match code.to_lowercase().as_str() {
        "a" | "tsukkomi" | "ツッコミ" => Some(Role::Tsukkomi),
        "b" | "boke" | "ボケ" => Some(Role::Boke),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_json_extraction() {
        let raw = "ここに台本があります。\n```json\n{\"script\": [\n  {\"speaker\": \"A\", \"text\": \"hi\"},\n  {\"speaker\": \"B\", \"text\": \"bye\"}\n]}\n```\n以上です。";
        let lines = extract_script_lines(raw).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].role, Role::Tsukkomi);
        assert_eq!(lines[0].text, "hi");
        assert_eq!(lines[1].role, Role::Boke);
        assert_eq!(lines[1].text, "bye");
    }

    #[test]
    fn test_fenced_and_bare_json_agree() {
        let bare = r#"{"script":[{"speaker":"A","text":"hi"},{"speaker":"B","text":"bye"}]}"#;
        let fenced = format!("```json\n{bare}\n```");
        let from_bare = extract_script_lines(bare).unwrap();
        let from_fenced = extract_script_lines(&fenced).unwrap();
        assert_eq!(from_bare, from_fenced);
    }

    #[test]
    fn test_brace_span_extraction() {
        let raw = "前置きです。 {\"script\": [{\"speaker\": \"A\", \"text\": \"こんにちは\"}]} 後書きです。";
        let lines = extract_script_lines(raw).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "こんにちは");
    }

    #[test]
    fn test_line_fallback_parsing() {
        let lines = extract_script_lines("A: hello\nB: world").unwrap();
        assert_eq!(
            lines,
            vec![
                ScriptLine {
                    role: Role::Tsukkomi,
                    text: "hello".to_string()
                },
                ScriptLine {
                    role: Role::Boke,
                    text: "world".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_line_fallback_skips_unrecognized() {
        let raw = "タイトル: 猫の漫才\nA: どうも\nナレーター: 場面転換\nB: にゃー\n補足だけの行";
        let lines = extract_script_lines(raw).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "どうも");
        assert_eq!(lines[1].text, "にゃー");
    }

    #[test]
    fn test_line_fallback_inside_code_fence() {
        let raw = "台本です。\n```\nA: おはよう\nB: おやすみ\n```";
        let lines = extract_script_lines(raw).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].role, Role::Tsukkomi);
        assert_eq!(lines[1].role, Role::Boke);
    }

    #[test]
    fn test_role_codes_by_name() {
        let lines = extract_script_lines("ツッコミ: おい\nボケ: なんでやねん逆や").unwrap();
        assert_eq!(lines[0].role, Role::Tsukkomi);
        assert_eq!(lines[1].role, Role::Boke);
    }

    #[test]
    fn test_empty_items_are_dropped() {
        let raw = r#"{"script":[{"speaker":"A","text":"  "},{"speaker":"B","text":"残った"}]}"#;
        let lines = extract_script_lines(raw).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "残った");
    }

    #[test]
    fn test_unknown_json_speaker_maps_to_boke() {
        let raw = r#"{"script":[{"speaker":"C","text":"だれ?"}]}"#;
        let lines = extract_script_lines(raw).unwrap();
        assert_eq!(lines[0].role, Role::Boke);
    }

    #[test]
    fn test_unusable_output_is_parse_error() {
        let err = extract_script_lines("模型は今日は元気がありません。").unwrap_err();
        assert!(matches!(err, ServiceError::Parse(_)));
    }

    #[test]
    fn test_fallback_script_shape() {
        let script = fallback_script("cats");
        assert_eq!(script.lines.len(), 2);
        assert_eq!(script.lines[0].role, Role::Tsukkomi);
        assert_eq!(script.lines[1].role, Role::Boke);
        assert!(script.lines[0].text.contains("cats"));
    }
}
