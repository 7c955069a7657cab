//! The single source of truth for what "valid" and "correct" mean per task.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{Field, ResponseFormat, ValueType};

pub const GENERATE_ANSWER: &str = "GenerateAnswer";
pub const RATE_CONTEXT: &str = "RateContext";
pub const ASSESS_ANSWERABILITY: &str = "AssessAnswerability";
pub const PARAPHRASE_QUESTIONS: &str = "ParaphraseQuestions";
pub const GENERATE_ANSWER_WITH_CONFIDENCE: &str = "GenerateAnswerWithConfidence";
pub const GENERATE_ANSWERS_WITH_CONFIDENCE: &str = "GenerateAnswersWithConfidence";
pub const RAGAS: &str = "RAGAS";
pub const CLASSIFY_DOCUMENT: &str = "ClassifyDocument";
pub const CLASSIFY_DOCUMENT_WITH_RATIONALE: &str = "ClassifyDocumentWithRationale";
/// Contract the model judge must answer with.
pub const JUDGE_RATING: &str = "JudgeRating";

/// Dataset fields a task feeds into its prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Context,
    Question,
    Answer,
    Document,
    Classes,
}

impl Reference {
    pub fn name(&self) -> &'static str {
        match self {
            Reference::Context => "context",
            Reference::Question => "question",
            Reference::Answer => "answer",
            Reference::Document => "document",
            Reference::Classes => "classes_with_descriptions",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoringRule {
    /// Structural signal only; the task metric is always 0.
    None,
    /// 1 when the boolean at `key` equals the item's `answerable` flag.
    ExactBool { key: String },
    /// 1 when the string at `key` equals the item's label.
    ExactLabel { key: String },
    /// The string at `key` is rated against the reference answer by a judge.
    Judge { key: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Category {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskContract {
    pub id: String,
    pub instructions: String,
    pub response_format: ResponseFormat,
    pub references: Vec<Reference>,
    pub scoring: ScoringRule,
    /// Only set for classification tasks.
    pub categories: Vec<Category>,
}

impl TaskContract {
    pub fn new(id: impl Into<String>, instructions: impl Into<String>, response_format: ResponseFormat) -> Self {
        Self {
            id: id.into(),
            instructions: instructions.into(),
            response_format,
            references: vec![Reference::Context, Reference::Question],
            scoring: ScoringRule::None,
            categories: Vec::new(),
        }
    }

    pub fn references(mut self, references: &[Reference]) -> Self {
        self.references = references.to_vec();
        self
    }

    pub fn scoring(mut self, scoring: ScoringRule) -> Self {
        self.scoring = scoring;
        self
    }

    fn categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = categories;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Registry {
    tasks: BTreeMap<String, TaskContract>,
}

impl Registry {
    pub fn empty() -> Self {
        Self { tasks: BTreeMap::new() }
    }

    /// Registry with every built-in task. Classification tasks need
    /// categories and are added with [`Registry::with_categories`].
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for contract in builtin_contracts() {
            // ids below are distinct
            registry.tasks.insert(contract.id.clone(), contract);
        }
        registry
    }

    /// Adds the classification tasks, validated against `categories` by set
    /// membership.
    pub fn with_categories(mut self, categories: Vec<Category>) -> Result<Self> {
        if categories.is_empty() {
            return Err(Error::Config("classification tasks need at least one category".into()));
        }
        let names: Vec<String> = categories.iter().map(|c| c.name.clone()).collect();
        self.register(
            TaskContract::new(
                CLASSIFY_DOCUMENT,
                "Classify the document into one of the provided categories.",
                ResponseFormat::Object(vec![Field::new("category", ValueType::OneOf(names.clone()))]),
            )
            .references(&[Reference::Document, Reference::Classes])
            .scoring(ScoringRule::ExactLabel { key: "category".into() })
            .categories(categories.clone()),
        )?;
        self.register(
            TaskContract::new(
                CLASSIFY_DOCUMENT_WITH_RATIONALE,
                "Classify the document into one of the provided categories. Explain your reasoning before giving the category.",
                ResponseFormat::Object(vec![
                    Field::new("rationale", ValueType::String),
                    Field::new("category", ValueType::OneOf(names)),
                ]),
            )
            .references(&[Reference::Document, Reference::Classes])
            .scoring(ScoringRule::ExactLabel { key: "category".into() })
            .categories(categories),
        )?;
        Ok(self)
    }

    pub fn register(&mut self, contract: TaskContract) -> Result<()> {
        if self.tasks.contains_key(&contract.id) {
            return Err(Error::DuplicateTask(contract.id));
        }
        self.tasks.insert(contract.id.clone(), contract);
        Ok(())
    }

    pub fn lookup(&self, task_id: &str) -> Result<&TaskContract> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| Error::UnknownTask(task_id.to_string()))
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn confidence_fields() -> Vec<Field> {
    vec![
        Field::new("Answer", ValueType::String),
        Field::new("Confidence", ValueType::Integer { min: 0, max: 5 }),
    ]
}

fn builtin_contracts() -> Vec<TaskContract> {
    let score = || ValueType::Float { min: 0.0, max: 5.0 };
    vec![
        TaskContract::new(
            GENERATE_ANSWER,
            "Assess the context and answer the question. If the context does not contain sufficient information to answer the question, respond with \"NOT ENOUGH CONTEXT\".",
            ResponseFormat::Object(vec![Field::new("answer", ValueType::String)]),
        )
        .scoring(ScoringRule::Judge { key: "answer".into() }),
        TaskContract::new(
            RATE_CONTEXT,
            "Assess how well the context helps answer the question.",
            ResponseFormat::Object(vec![Field::new("context_score", ValueType::Integer { min: 0, max: 5 })]),
        ),
        TaskContract::new(
            ASSESS_ANSWERABILITY,
            "Determine if the question is answerable based on the context.",
            ResponseFormat::Object(vec![Field::new("answerable_question", ValueType::Boolean)]),
        )
        .scoring(ScoringRule::ExactBool { key: "answerable_question".into() }),
        TaskContract::new(
            PARAPHRASE_QUESTIONS,
            "Generate 3 paraphrased versions of the given question.",
            ResponseFormat::Object(vec![Field::new(
                "paraphrased_questions",
                ValueType::StringList { min_len: 3, max_len: Some(3) },
            )]),
        )
        .references(&[Reference::Question]),
        TaskContract::new(
            GENERATE_ANSWER_WITH_CONFIDENCE,
            "Generate an answer with a confidence score.",
            ResponseFormat::Object(confidence_fields()),
        ),
        TaskContract::new(
            GENERATE_ANSWERS_WITH_CONFIDENCE,
            "Generate multiple answers with confidence scores.",
            ResponseFormat::ListOf { fields: confidence_fields(), min_items: 1 },
        ),
        TaskContract::new(
            RAGAS,
            "Assess the faithfulness, answer relevance, and context relevance given a question, context, and answer.",
            ResponseFormat::Object(vec![
                Field::new("faithfulness_score", score()),
                Field::new("answer_relevance_score", score()),
                Field::new("context_relevance_score", score()),
            ]),
        )
        .references(&[Reference::Context, Reference::Question, Reference::Answer]),
        TaskContract::new(
            JUDGE_RATING,
            "Rate how well the system answer matches the ground truth answer to the question, given the context, on a scale of 0 to 5.",
            ResponseFormat::Object(vec![
                Field::new("rationale", ValueType::String),
                Field::new("rating", ValueType::Integer { min: 0, max: 5 }),
            ]),
        )
        .references(&[]),
    ]
}
