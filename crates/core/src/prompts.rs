//! Prompt templates.
//!
//! Templates are Markdown files with `{placeholder}` slots. The built-in set is
//! compiled into the binary; a deployment may override any of them by dropping
//! a file with the same stem into a prompts directory.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

pub const EXAMINER_SYSTEM: &str = "examiner_system";
pub const EXAMINER_OPENING_SCRIPTED: &str = "examiner_opening_scripted";
pub const EXAMINER_OPENING_OPEN: &str = "examiner_opening_open";
pub const EXAMINER_TURN_SCRIPTED: &str = "examiner_turn_scripted";
pub const EXAMINER_TURN_FOLLOW_UP: &str = "examiner_turn_follow_up";
pub const EXAMINER_TURN_CLOSING: &str = "examiner_turn_closing";
pub const SESSION_GRADING: &str = "session_grading";
pub const PRONUNCIATION: &str = "pronunciation";
pub const WRITING: &str = "writing";

const BUILTIN: &[(&str, &str)] = &[
    (EXAMINER_SYSTEM, include_str!("../prompts/examiner_system.md")),
    (
        EXAMINER_OPENING_SCRIPTED,
        include_str!("../prompts/examiner_opening_scripted.md"),
    ),
    (
        EXAMINER_OPENING_OPEN,
        include_str!("../prompts/examiner_opening_open.md"),
    ),
    (
        EXAMINER_TURN_SCRIPTED,
        include_str!("../prompts/examiner_turn_scripted.md"),
    ),
    (
        EXAMINER_TURN_FOLLOW_UP,
        include_str!("../prompts/examiner_turn_follow_up.md"),
    ),
    (
        EXAMINER_TURN_CLOSING,
        include_str!("../prompts/examiner_turn_closing.md"),
    ),
    (SESSION_GRADING, include_str!("../prompts/session_grading.md")),
    (PRONUNCIATION, include_str!("../prompts/pronunciation.md")),
    (WRITING, include_str!("../prompts/writing.md")),
];

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("unknown prompt template '{0}'")]
    UnknownTemplate(String),

    #[error("prompt template '{template}' has no value for placeholder '{{{placeholder}}}'")]
    MissingValue { template: String, placeholder: String },

    #[error("failed to read prompts from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A named set of prompt templates.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<String, String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptLibrary {
    /// The templates compiled into the binary.
    pub fn builtin() -> Self {
        let templates = BUILTIN
            .iter()
            .map(|(name, body)| (name.to_string(), body.to_string()))
            .collect();
        Self { templates }
    }

    /// The built-in templates, with every `*.md` file in `dir` replacing the
    /// template of the same stem.
    pub fn with_overrides(dir: &Path) -> Result<Self, PromptError> {
        let io_err = |source| PromptError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut library = Self::builtin();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("md") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let body = fs::read_to_string(&path).map_err(|source| PromptError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(template = stem, "Loaded prompt override");
            library.templates.insert(stem.to_string(), body);
        }
        info!(dir = %dir.display(), count = library.templates.len(), "Prompt library ready");
        Ok(library)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    /// Fills every `{placeholder}` in the template `name` from `vars`.
    ///
    /// Only braces enclosing a lowercase identifier are placeholders; JSON
    /// examples inside a template are left alone. Substituted values are not
    /// scanned again.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let template = self
            .get(name)
            .ok_or_else(|| PromptError::UnknownTemplate(name.to_string()))?;

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if is_placeholder(&after[..close]) => {
                    let key = &after[..close];
                    let value = vars
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| PromptError::MissingValue {
                            template: name.to_string(),
                            placeholder: key.to_string(),
                        })?;
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out.trim().to_string())
    }
}

fn is_placeholder(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates_are_present() {
        let library = PromptLibrary::builtin();
        for (name, _) in BUILTIN {
            assert!(library.get(name).is_some(), "{name}");
        }
    }

    #[test]
    fn test_render_substitutes_and_keeps_json_braces() {
        let library = PromptLibrary::builtin();
        let prompt = library
            .render(EXAMINER_OPENING_SCRIPTED, &[("question", "Do you live with your family?")])
            .unwrap();
        assert!(prompt.contains("ask exactly this question: \"Do you live with your family?\""));
        assert!(prompt.contains(r#"{ "transcription": "", "response": "Your intro and question" }"#));
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let library = PromptLibrary::builtin();
        let prompt = library
            .render(WRITING, &[("task_type", "General"), ("text", "I like {topic} a lot")])
            .unwrap();
        assert!(prompt.contains("Student Text: \"I like {topic} a lot\""));
    }

    #[test]
    fn test_missing_placeholder_is_an_error() {
        let library = PromptLibrary::builtin();
        let err = library.render(SESSION_GRADING, &[("topic", "Global Warming")]).unwrap_err();
        match err {
            PromptError::MissingValue { template, placeholder } => {
                assert_eq!(template, SESSION_GRADING);
                assert_eq!(placeholder, "transcript");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            library.render("nope", &[]),
            Err(PromptError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn test_overrides_replace_builtin_templates() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path();
        fs::write(dir.join("writing.md"), "Grade {text} for {task_type}.").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let library = PromptLibrary::with_overrides(dir).unwrap();
        let prompt = library
            .render(WRITING, &[("text", "this"), ("task_type", "IELTS")])
            .unwrap();
        assert_eq!(prompt, "Grade this for IELTS.");
        assert!(library.get(PRONUNCIATION).is_some());
    }
}
