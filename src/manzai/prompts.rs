use super::types::TemplateError;

use std::fs;
use std::path::PathBuf;

/// The prompt handed to the generation model. Asks for strict JSON so the
/// primary extraction strategy can work; the parser still tolerates the
/// model ignoring that instruction.
const MANZAI_PROMPT: &str = r#"あなたはベテランの漫才作家です。「{topic}」をテーマにした漫才の台本を作成してください。

登場人物は2人です:
- A: ツッコミ役。常識的な視点で話を進め、相方の発言を鋭く訂正する。
- B: ボケ役。テーマから少しずれた勘違いやおかしな発言をする。

出力は次のJSON形式のみとし、JSON以外の文章は一切含めないでください:

{"script": [
  {"speaker": "A", "text": "..."},
  {"speaker": "B", "text": "..."}
]}

- speakerは"A"または"B"のみ
- 8行から12行程度の掛け合いにする
- 最後はツッコミ役の一言で締める
"#;

/// Loads prompt templates by name and fills `{variable}` placeholders.
///
/// Templates are plain text files in an optional override directory; names
/// without a file fall back to the built-in set. This is the whole surface —
/// template authoring and storage live elsewhere.
pub struct PromptStore {
    templates_dir: Option<PathBuf>,
}

impl PromptStore {
    pub fn new(templates_dir: Option<PathBuf>) -> Self {
        Self { templates_dir }
    }

    pub fn load_template(
        &self,
        name: &str,
        vars: &[(&str, &str)],
    ) -> Result<String, TemplateError> {
        let template = self.raw_template(name)?;
        if template.trim().is_empty() {
            return Err(TemplateError::Malformed(format!(
                "template '{name}' is empty"
            )));
        }

        let mut filled = template;
        for (key, value) in vars {
            filled = filled.replace(&format!("{{{key}}}"), value);
        }

        if let Some(missing) = first_placeholder(&filled) {
            return Err(TemplateError::MissingVariable(missing));
        }

        Ok(filled)
    }

    fn raw_template(&self, name: &str) -> Result<String, TemplateError> {
        if let Some(dir) = &self.templates_dir {
            let path = dir.join(format!("{name}.txt"));
            match fs::read_to_string(&path) {
                Ok(text) => return Ok(text),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(TemplateError::Malformed(format!(
                        "failed to read {}: {e}",
                        path.display()
                    )))
                }
            }
        }

        match name {
            "manzai_prompt" => Ok(MANZAI_PROMPT.to_string()),
            _ => Err(TemplateError::NotFound(name.to_string())),
        }
    }
}

impl Default for PromptStore {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Find a `{identifier}` placeholder left after substitution. Identifier
/// characters only, so JSON braces in template bodies never match.
fn first_placeholder(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
            {
                end += 1;
            }
            if end > start && end < bytes.len() && bytes[end] == b'}' {
                return Some(text[start..end].to_string());
            }
        }
        i += 1;
    }
    None
}
