use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use structeval_types::{DatasetItem, PromptingMethod};

use crate::error::{Error, Result};
use crate::model::ModelClient;
use crate::prompt;
use crate::registry::{Registry, ScoringRule, TaskContract, JUDGE_RATING};
use crate::validator::validate_contract;

/// Rates a free-text system answer against the reference answer.
#[async_trait]
pub trait Judge: Send + Sync {
	async fn rate(&self, context: &str, question: &str, system_answer: &str, ground_truth: &str) -> anyhow::Result<f64>;
}

/// Computes the task metric for a structurally valid response.
pub struct Scorer {
	judge: Option<Arc<dyn Judge>>,
	warned_no_judge: AtomicBool,
}

impl Scorer {
	pub fn new() -> Self {
		Self { judge: None, warned_no_judge: AtomicBool::new(false) }
	}

	pub fn with_judge(judge: Arc<dyn Judge>) -> Self {
		Self { judge: Some(judge), warned_no_judge: AtomicBool::new(false) }
	}

	/// Only call with a value that passed validation. Judge failures surface
	/// as `ExternalInvocation`.
	pub async fn score(&self, contract: &TaskContract, parsed: &Value, truth: &DatasetItem) -> Result<f64> {
		match &contract.scoring {
			ScoringRule::None => Ok(0.0),
			ScoringRule::ExactBool { key } => {
				let (Some(answer), Some(expected)) = (parsed.get(key).and_then(Value::as_bool), truth.answerable) else {
					tracing::debug!(task = %contract.id, "no boolean ground truth, metric is 0");
					return Ok(0.0);
				};
				Ok(exact(answer == expected))
			}
			ScoringRule::ExactLabel { key } => {
				let (Some(answer), Some(expected)) = (parsed.get(key).and_then(Value::as_str), truth.label.as_deref()) else {
					tracing::debug!(task = %contract.id, "no label ground truth, metric is 0");
					return Ok(0.0);
				};
				Ok(exact(answer == expected))
			}
			ScoringRule::Judge { key } => {
				let Some(judge) = &self.judge else {
					if !self.warned_no_judge.swap(true, Ordering::Relaxed) {
						tracing::warn!(task = %contract.id, "no judge configured, task metric will be 0");
					}
					return Ok(0.0);
				};
				let system_answer = parsed.get(key).and_then(Value::as_str).unwrap_or_default();
				judge
					.rate(&truth.context, &truth.question, system_answer, &truth.answer)
					.await
					.map_err(Error::external)
			}
		}
	}
}

impl Default for Scorer {
	fn default() -> Self {
		Self::new()
	}
}

fn exact(equal: bool) -> f64 {
	if equal { 1.0 } else { 0.0 }
}

/// A judge backed by a model, answering the `JudgeRating` contract.
pub struct ModelJudge {
	client: Arc<dyn ModelClient>,
	contract: TaskContract,
}

impl ModelJudge {
	pub fn new(client: Arc<dyn ModelClient>, registry: &Registry) -> Result<Self> {
		Ok(Self { client, contract: registry.lookup(JUDGE_RATING)?.clone() })
	}
}

#[async_trait]
impl Judge for ModelJudge {
	async fn rate(&self, context: &str, question: &str, system_answer: &str, ground_truth: &str) -> anyhow::Result<f64> {
		let references = [
			("context", context.to_string()),
			("question", question.to_string()),
			("system_answer", system_answer.to_string()),
			("ground_truth", ground_truth.to_string()),
		];
		let prompt = prompt::render(PromptingMethod::Fstring, &self.contract, &references);
		let raw = self.client.complete(&prompt, None).await?;
		let outcome = validate_contract(&self.contract, &raw);
		let rating = outcome
			.parsed_value
			.as_ref()
			.filter(|_| outcome.is_structurally_valid)
			.and_then(|v| v.get("rating"))
			.and_then(Value::as_f64);
		match rating {
			Some(r) => Ok(r),
			None => anyhow::bail!(
				"judge reply does not match {}: {}",
				JUDGE_RATING,
				outcome.violation.map(|v| v.to_string()).unwrap_or_default()
			),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{from_async_fn, StaticClient};
	use crate::registry::{Category, ASSESS_ANSWERABILITY, CLASSIFY_DOCUMENT, GENERATE_ANSWER, RATE_CONTEXT};
	use serde_json::json;

	fn registry() -> Registry {
		Registry::builtin().with_categories(vec![Category::new("a", ""), Category::new("b", "")]).unwrap()
	}

	async fn answerability(parsed: bool, truth: bool) -> f64 {
		let registry = registry();
		let contract = registry.lookup(ASSESS_ANSWERABILITY).unwrap();
		let item = DatasetItem::qa("c", "q", "a").with_answerable(truth);
		Scorer::new().score(contract, &json!({ "answerable_question": parsed }), &item).await.unwrap()
	}

	#[tokio::test]
	async fn answerability_is_exact_match() {
		assert_eq!(answerability(true, true).await, 1.0);
		assert_eq!(answerability(true, false).await, 0.0);
		assert_eq!(answerability(false, false).await, 1.0);
		assert_eq!(answerability(false, true).await, 0.0);
	}

	#[tokio::test]
	async fn classification_compares_labels() {
		let registry = registry();
		let contract = registry.lookup(CLASSIFY_DOCUMENT).unwrap();
		let item = DatasetItem::document("doc", "b");
		let scorer = Scorer::new();
		assert_eq!(scorer.score(contract, &json!({ "category": "b" }), &item).await.unwrap(), 1.0);
		assert_eq!(scorer.score(contract, &json!({ "category": "a" }), &item).await.unwrap(), 0.0);
	}

	#[tokio::test]
	async fn unscored_tasks_yield_zero() {
		let registry = registry();
		let contract = registry.lookup(RATE_CONTEXT).unwrap();
		let metric = Scorer::new()
			.score(contract, &json!({ "context_score": 5 }), &DatasetItem::default())
			.await
			.unwrap();
		assert_eq!(metric, 0.0);
	}

	#[tokio::test]
	async fn generate_answer_without_judge_is_zero() {
		let registry = registry();
		let contract = registry.lookup(GENERATE_ANSWER).unwrap();
		let metric = Scorer::new().score(contract, &json!({ "answer": "x" }), &DatasetItem::default()).await.unwrap();
		assert_eq!(metric, 0.0);
	}

	#[tokio::test]
	async fn model_judge_passes_answer_and_truth() {
		let registry = registry();
		let client = from_async_fn(|prompt, _| async move {
			assert!(prompt.contains("system_answer: Paris"));
			assert!(prompt.contains("ground_truth: Paris, France"));
			Ok(r#"{"rationale": "same city", "rating": 4}"#.to_string())
		});
		let judge = Arc::new(ModelJudge::new(client, &registry).unwrap());
		let scorer = Scorer::with_judge(judge);
		let contract = registry.lookup(GENERATE_ANSWER).unwrap();
		let item = DatasetItem::qa("ctx", "Capital of France?", "Paris, France");
		let metric = scorer.score(contract, &json!({ "answer": "Paris" }), &item).await.unwrap();
		assert_eq!(metric, 4.0);
	}

	#[tokio::test]
	async fn malformed_judge_reply_is_an_external_failure() {
		let registry = registry();
		let judge = Arc::new(ModelJudge::new(Arc::new(StaticClient::new("great answer!")), &registry).unwrap());
		let scorer = Scorer::with_judge(judge);
		let contract = registry.lookup(GENERATE_ANSWER).unwrap();
		let err = scorer
			.score(contract, &json!({ "answer": "x" }), &DatasetItem::default())
			.await
			.unwrap_err();
		assert!(matches!(err, Error::ExternalInvocation(_)));
	}
}
