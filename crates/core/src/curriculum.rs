//! Curriculum tables
//!
//! Units for the speaking and writing exercises are plain data. A default set
//! is compiled in; a deployment can replace it with its own JSON file. The
//! tables are loaded once at startup and never change afterwards.

use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, path::Path};
use thiserror::Error;
use tracing::info;

const BUILTIN_CURRICULUM: &str = include_str!("../data/curriculum.json");

#[derive(Debug, Error)]
pub enum CurriculumError {
    #[error("failed to read curriculum file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("curriculum is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid curriculum: {0}")]
    Invalid(String),
}

/// A pre-authored free-speaking question with a prompt for ideas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedQuestion {
    pub question: String,
    #[serde(default)]
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakingUnit {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Sentences read aloud in the shadowing exercise.
    pub shadowing_sentences: Vec<String>,
    /// Scripted questions for the free-speaking session; may be empty.
    #[serde(default)]
    pub questions: Vec<ScriptedQuestion>,
}

impl SpeakingUnit {
    pub fn scripted_questions(&self) -> Vec<String> {
        self.questions.iter().map(|q| q.question.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritingKind {
    Essay,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssayStructure {
    pub introduction: String,
    pub body: String,
    pub conclusion: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritingUnit {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub task: WritingKind,
    /// Sentences rebuilt word by word in part one.
    pub scramble_sentences: Vec<String>,
    /// Sentences of one paragraph, in the correct order, for part two.
    pub paragraph_sentences: Vec<String>,
    pub essay_prompt: String,
    #[serde(default)]
    pub essay_hint: String,
    pub structure: EssayStructure,
}

/// A shuffled puzzle piece. `id` is the piece's position in the solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzlePiece {
    pub id: usize,
    pub text: String,
}

fn shuffled<R: Rng + ?Sized>(items: impl Iterator<Item = String>, rng: &mut R) -> Vec<PuzzlePiece> {
    let mut pieces: Vec<PuzzlePiece> = items
        .enumerate()
        .map(|(id, text)| PuzzlePiece { id, text })
        .collect();
    pieces.shuffle(rng);
    pieces
}

impl WritingUnit {
    /// The words of scramble sentence `index`, shuffled.
    pub fn scrambled_sentence<R: Rng + ?Sized>(
        &self,
        index: usize,
        rng: &mut R,
    ) -> Option<Vec<PuzzlePiece>> {
        let sentence = self.scramble_sentences.get(index)?;
        Some(shuffled(sentence.split(' ').map(str::to_string), rng))
    }

    /// The paragraph sentences, shuffled.
    pub fn scrambled_paragraph<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<PuzzlePiece> {
        shuffled(self.paragraph_sentences.iter().cloned(), rng)
    }

    /// Whether `words` rebuild scramble sentence `index` exactly.
    /// `None` when there is no such sentence.
    pub fn check_sentence(&self, index: usize, words: &[String]) -> Option<bool> {
        let sentence = self.scramble_sentences.get(index)?;
        Some(words.join(" ") == *sentence)
    }

    /// Whether `order` (piece ids) puts every paragraph sentence in place.
    pub fn check_paragraph(&self, order: &[usize]) -> bool {
        order.len() == self.paragraph_sentences.len()
            && order.iter().enumerate().all(|(position, id)| position == *id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Curriculum {
    pub speaking: Vec<SpeakingUnit>,
    pub writing: Vec<WritingUnit>,
}

impl Curriculum {
    /// The tables compiled into the binary.
    pub fn builtin() -> Result<Self, CurriculumError> {
        Self::from_json(BUILTIN_CURRICULUM)
    }

    pub fn from_json(json: &str) -> Result<Self, CurriculumError> {
        let curriculum: Self = serde_json::from_str(json)?;
        curriculum.validate()?;
        Ok(curriculum)
    }

    pub fn load(path: &Path) -> Result<Self, CurriculumError> {
        let json = fs::read_to_string(path).map_err(|source| CurriculumError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let curriculum = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            speaking = curriculum.speaking.len(),
            writing = curriculum.writing.len(),
            "Loaded curriculum"
        );
        Ok(curriculum)
    }

    pub fn speaking_unit(&self, id: u32) -> Option<&SpeakingUnit> {
        self.speaking.iter().find(|u| u.id == id)
    }

    pub fn writing_unit(&self, id: u32) -> Option<&WritingUnit> {
        self.writing.iter().find(|u| u.id == id)
    }

    fn validate(&self) -> Result<(), CurriculumError> {
        let mut seen = HashSet::new();
        for unit in &self.speaking {
            if !seen.insert(unit.id) {
                return Err(CurriculumError::Invalid(format!(
                    "speaking unit {} is listed twice",
                    unit.id
                )));
            }
            if unit.shadowing_sentences.is_empty() {
                return Err(CurriculumError::Invalid(format!(
                    "speaking unit {} has no shadowing sentences",
                    unit.id
                )));
            }
        }

        seen.clear();
        for unit in &self.writing {
            if !seen.insert(unit.id) {
                return Err(CurriculumError::Invalid(format!(
                    "writing unit {} is listed twice",
                    unit.id
                )));
            }
            if unit.scramble_sentences.is_empty() || unit.paragraph_sentences.is_empty() {
                return Err(CurriculumError::Invalid(format!(
                    "writing unit {} is missing puzzle sentences",
                    unit.id
                )));
            }
        }
        Ok(())
    }
}
