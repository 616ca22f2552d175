use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rand::seq::IndexedRandom;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizQuestion {
    pub question: String,
    pub answer: String,
}

/// Supplies the next round's question.
pub trait QuestionSource: Send + Sync {
    fn pick(&self) -> Option<QuizQuestion>;
}

/// In-memory question list read from a `question|answer` text file.
#[derive(Debug, Clone)]
pub struct QuizCorpus {
    path: Option<PathBuf>,
    questions: Vec<QuizQuestion>,
}

impl QuizCorpus {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read quiz corpus {}", path.display()))?;
        let mut corpus = Self::parse(&raw);
        if corpus.questions.is_empty() {
            bail!("quiz corpus {} contains no questions", path.display());
        }
        corpus.path = Some(path.to_path_buf());
        tracing::info!(
            path = %path.display(),
            questions = corpus.questions.len(),
            "quiz corpus loaded"
        );
        Ok(corpus)
    }

    /// Parses one pair per line. Lines without a separator or with an empty
    /// side are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut questions = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((question, answer)) = line.split_once('|') else {
                tracing::warn!(line = index + 1, "quiz corpus line has no separator, skipping");
                continue;
            };
            let (question, answer) = (question.trim(), answer.trim());
            if question.is_empty() || answer.is_empty() {
                tracing::warn!(line = index + 1, "quiz corpus line has an empty side, skipping");
                continue;
            }
            questions.push(QuizQuestion {
                question: question.to_string(),
                answer: answer.to_string(),
            });
        }
        Self {
            path: None,
            questions,
        }
    }

    pub fn from_questions(questions: Vec<QuizQuestion>) -> Self {
        Self {
            path: None,
            questions,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

impl QuestionSource for QuizCorpus {
    fn pick(&self) -> Option<QuizQuestion> {
        self.questions.choose(&mut rand::rng()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{QuestionSource, QuizCorpus, QuizQuestion};

    #[test]
    fn unit_parse_skips_blank_and_malformed_lines() {
        let corpus = QuizCorpus::parse(
            "Автор «Лунной сонаты»? | Бетховен\n\
             \n\
             без разделителя\n\
             |пустой вопрос\n\
             пустой ответ|  \n\
             Столица Австрии|Вена|лишнее\n",
        );
        assert_eq!(
            corpus.questions(),
            &[
                QuizQuestion {
                    question: "Автор «Лунной сонаты»?".to_string(),
                    answer: "Бетховен".to_string(),
                },
                QuizQuestion {
                    question: "Столица Австрии".to_string(),
                    answer: "Вена|лишнее".to_string(),
                },
            ]
        );
    }

    #[test]
    fn unit_pick_returns_a_corpus_question() {
        let corpus = QuizCorpus::parse("a|1\nb|2\nc|3\n");
        for _ in 0..20 {
            let picked = corpus.pick().expect("non-empty corpus");
            assert!(corpus.questions().contains(&picked));
        }
        assert!(QuizCorpus::parse("").pick().is_none());
    }

    #[test]
    fn functional_load_reads_file_and_rejects_empty_corpus() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("questions.txt");
        std::fs::write(&path, "Сколько симфоний написал Бетховен?|9\n").expect("write");

        let corpus = QuizCorpus::load(&path).expect("load");
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.path(), Some(path.as_path()));

        std::fs::write(&path, "мусор\n").expect("rewrite");
        let error = QuizCorpus::load(&path).expect_err("empty corpus");
        assert!(error.to_string().contains("contains no questions"));

        let missing = QuizCorpus::load(&temp.path().join("missing.txt")).expect_err("missing");
        assert!(format!("{missing:#}").contains("failed to read quiz corpus"));
    }
}
