use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::registry::{Registry, TaskContract};
use crate::schema::Violation;

/// Structural verdict for one raw response.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
	pub is_structurally_valid: bool,
	/// Present whenever the response parsed as JSON, valid or not.
	pub parsed_value: Option<Value>,
	pub violation: Option<Violation>,
}

impl ValidationOutcome {
	fn valid(value: Value) -> Self {
		Self { is_structurally_valid: true, parsed_value: Some(value), violation: None }
	}

	fn invalid(parsed_value: Option<Value>, violation: Violation) -> Self {
		Self { is_structurally_valid: false, parsed_value, violation: Some(violation) }
	}
}

/// Parses `raw` and checks it against the contract. Never fails: a response
/// that does not parse is simply invalid.
pub fn validate_contract(contract: &TaskContract, raw: &str) -> ValidationOutcome {
	let value: Value = match serde_json::from_str(raw) {
		Ok(v) => v,
		Err(err) => return ValidationOutcome::invalid(None, Violation::NotJson(err.to_string())),
	};
	match contract.response_format.check(&value) {
		Ok(()) => ValidationOutcome::valid(value),
		Err(violation) => ValidationOutcome::invalid(Some(value), violation),
	}
}

#[derive(Debug, Clone)]
pub struct Validator {
	registry: Arc<Registry>,
}

impl Validator {
	pub fn new(registry: Arc<Registry>) -> Self {
		Self { registry }
	}

	/// Fails only with `UnknownTask`.
	pub fn validate(&self, task_id: &str, raw: &str) -> Result<ValidationOutcome> {
		let contract = self.registry.lookup(task_id)?;
		Ok(validate_contract(contract, raw))
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::Error;
	use crate::registry::*;
	use serde_json::json;

	fn validator() -> Validator {
		Validator::new(Arc::new(Registry::builtin()))
	}

	fn is_valid(task: &str, raw: &str) -> bool {
		validator().validate(task, raw).unwrap().is_structurally_valid
	}

	#[test]
	fn conforming_responses_round_trip() {
		let cases = [
			(GENERATE_ANSWER, json!({ "answer": "Paris" })),
			(RATE_CONTEXT, json!({ "context_score": 0 })),
			(RATE_CONTEXT, json!({ "context_score": 5 })),
			(ASSESS_ANSWERABILITY, json!({ "answerable_question": false })),
			(PARAPHRASE_QUESTIONS, json!({ "paraphrased_questions": ["a?", "b?", "c?"] })),
			(GENERATE_ANSWER_WITH_CONFIDENCE, json!({ "Answer": "x", "Confidence": 4 })),
			(GENERATE_ANSWERS_WITH_CONFIDENCE, json!([{ "Answer": "x", "Confidence": 1 }, { "Answer": "y", "Confidence": 5 }])),
			(RAGAS, json!({ "faithfulness_score": 4.5, "answer_relevance_score": 0.0, "context_relevance_score": 5.0 })),
		];
		for (task, value) in cases {
			let outcome = validator().validate(task, &value.to_string()).unwrap();
			assert!(outcome.is_structurally_valid, "{task}: {:?}", outcome.violation);
			assert_eq!(outcome.parsed_value, Some(value));
		}
	}

	#[test]
	fn non_json_is_invalid_not_an_error() {
		for raw in ["", "hello", "```json\n{\"answer\": \"x\"}\n```", "{\"answer\": ", "[1, 2"] {
			let outcome = validator().validate(GENERATE_ANSWER, raw).unwrap();
			assert!(!outcome.is_structurally_valid);
			assert!(outcome.parsed_value.is_none());
			assert!(matches!(outcome.violation, Some(Violation::NotJson(_))));
		}
	}

	#[test]
	fn context_score_out_of_range() {
		assert!(!is_valid(RATE_CONTEXT, r#"{"context_score": 6}"#));
		assert!(!is_valid(RATE_CONTEXT, r#"{"context_score": -1}"#));
		assert!(!is_valid(RATE_CONTEXT, r#"{"context_score": true}"#));
		assert!(!is_valid(RATE_CONTEXT, r#"{"context_score": "3"}"#));
	}

	#[test]
	fn ragas_scores_must_be_floats() {
		let all_ints = r#"{"faithfulness_score": 4, "answer_relevance_score": 3, "context_relevance_score": 0}"#;
		let outcome = validator().validate(RAGAS, all_ints).unwrap();
		assert!(!outcome.is_structurally_valid);
		assert_eq!(
			outcome.violation,
			Some(Violation::WrongType { key: "faithfulness_score".into(), expected: "a float" })
		);
		assert!(is_valid(RAGAS, r#"{"faithfulness_score": 4.0, "answer_relevance_score": 3.5, "context_relevance_score": 0.0}"#));
	}

	#[test]
	fn confidence_list_rejects_one_bad_element() {
		let raw = r#"[{"Answer":"x","Confidence":3},{"Answer":"y","Confidence":7}]"#;
		let outcome = validator().validate(GENERATE_ANSWERS_WITH_CONFIDENCE, raw).unwrap();
		assert!(!outcome.is_structurally_valid);
		assert!(outcome.parsed_value.is_some());
	}

	#[test]
	fn boolean_confidence_is_rejected() {
		assert!(!is_valid(GENERATE_ANSWER_WITH_CONFIDENCE, r#"{"Answer": "x", "Confidence": true}"#));
	}

	#[test]
	fn paraphrase_requires_exactly_three() {
		assert!(!is_valid(PARAPHRASE_QUESTIONS, r#"{"paraphrased_questions": ["a", "b"]}"#));
		assert!(!is_valid(PARAPHRASE_QUESTIONS, r#"{"paraphrased_questions": ["a", "b", "c", "d"]}"#));
	}

	#[test]
	fn wrong_top_level_shape() {
		assert!(!is_valid(ASSESS_ANSWERABILITY, "true"));
		assert!(!is_valid(GENERATE_ANSWERS_WITH_CONFIDENCE, r#"{"Answer": "x", "Confidence": 1}"#));
	}

	#[test]
	fn extra_keys_are_allowed() {
		assert!(is_valid(ASSESS_ANSWERABILITY, r#"{"answerable_question": true, "why": "context says so"}"#));
	}

	#[test]
	fn classification_checks_membership() {
		let registry = Registry::builtin()
			.with_categories(vec![Category::new("sports", ""), Category::new("science", "")])
			.unwrap();
		let validator = Validator::new(Arc::new(registry));
		assert!(validator.validate(CLASSIFY_DOCUMENT, r#"{"category": "science"}"#).unwrap().is_structurally_valid);
		let outcome = validator.validate(CLASSIFY_DOCUMENT, r#"{"category": "cooking"}"#).unwrap();
		assert!(matches!(outcome.violation, Some(Violation::NotAllowed { .. })));
	}

	#[test]
	fn unknown_task_fails() {
		assert!(matches!(validator().validate("Nope", "{}"), Err(Error::UnknownTask(_))));
	}
}
