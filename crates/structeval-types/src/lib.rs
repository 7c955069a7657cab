use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tabled::Tabled;

pub mod bucket;

pub use bucket::{AggregateBucket, BucketStatus, RunScores};

/// Prefix written into `response` when a trial never produced model output.
pub const ERROR_SENTINEL: &str = "ERROR:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptWithResponse {
	pub prompt: String,
	pub response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptingMethod {
	Dspy,
	Fstring,
}

impl PromptingMethod {
	pub const ALL: [PromptingMethod; 2] = [PromptingMethod::Dspy, PromptingMethod::Fstring];

	pub fn as_str(&self) -> &'static str {
		match self {
			PromptingMethod::Dspy => "dspy",
			PromptingMethod::Fstring => "fstring",
		}
	}
}

impl fmt::Display for PromptingMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for PromptingMethod {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"dspy" => Ok(PromptingMethod::Dspy),
			"fstring" | "f-string" => Ok(PromptingMethod::Fstring),
			other => Err(format!("unknown prompting method '{other}' (expected dspy or fstring)")),
		}
	}
}

/// One input item of a dataset. Question-answering datasets fill
/// `context`/`question`/`answer`/`answerable`; classification datasets fill
/// `document`/`label`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetItem {
	pub id: Option<String>,
	pub title: String,
	pub context: String,
	pub question: String,
	pub answer: String,
	pub answerable: Option<bool>,
	pub document: String,
	pub label: Option<String>,
}

impl DatasetItem {
	pub fn qa(context: impl Into<String>, question: impl Into<String>, answer: impl Into<String>) -> Self {
		Self { context: context.into(), question: question.into(), answer: answer.into(), ..Default::default() }
	}

	pub fn with_answerable(mut self, answerable: bool) -> Self {
		self.answerable = Some(answerable);
		self
	}

	pub fn document(document: impl Into<String>, label: impl Into<String>) -> Self {
		Self { document: document.into(), label: Some(label.into()), ..Default::default() }
	}
}

/// One (prompt, response) evaluation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleTrialResult {
	pub prompt_with_response: PromptWithResponse,
	pub is_valid: bool,
	/// 0 when invalid or when the task has no scorer.
	pub task_metric: f64,
}

impl SingleTrialResult {
	pub fn new(prompt: impl Into<String>, response: impl Into<String>, is_valid: bool, task_metric: f64) -> Self {
		Self {
			prompt_with_response: PromptWithResponse { prompt: prompt.into(), response: response.into() },
			is_valid,
			task_metric: if is_valid { task_metric } else { 0.0 },
		}
	}

	/// A trial whose model or judge call failed. Never valid, never retried.
	pub fn errored(prompt: impl Into<String>, reason: impl fmt::Display) -> Self {
		Self::new(prompt, format!("{ERROR_SENTINEL} {reason}"), false, 0.0)
	}
}

/// One full run of a (task, model, provider, prompting method[, trial]) combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
	pub test_name: String,
	pub model_name: String,
	#[serde(default)]
	pub model_provider: String,
	pub prompting_method: PromptingMethod,
	#[serde(default)]
	pub structured_output: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub trial: Option<String>,
	pub num_successes: u64,
	pub total_task_performance: f64,
	pub num_attempts: u64,
	pub success_rate: f64,
	pub average_task_performance: f64,
	/// Wall-clock seconds for the whole run.
	pub total_time: u64,
	pub all_responses: Vec<PromptWithResponse>,
	pub failed_responses: Vec<PromptWithResponse>,
}

impl ExperimentRecord {
	pub fn new(
		test_name: impl Into<String>,
		model_name: impl Into<String>,
		model_provider: impl Into<String>,
		prompting_method: PromptingMethod,
	) -> Self {
		Self {
			test_name: test_name.into(),
			model_name: model_name.into(),
			model_provider: model_provider.into(),
			prompting_method,
			structured_output: false,
			trial: None,
			num_successes: 0,
			total_task_performance: 0.0,
			num_attempts: 0,
			success_rate: 0.0,
			average_task_performance: 0.0,
			total_time: 0,
			all_responses: Vec::new(),
			failed_responses: Vec::new(),
		}
	}

	pub fn with_structured_output(mut self, structured: bool) -> Self {
		self.structured_output = structured;
		self
	}

	pub fn with_trial(mut self, trial: Option<String>) -> Self {
		self.trial = trial;
		self
	}

	/// Classifies one trial as success or failure and updates the counters.
	/// Derived rates are stale until `finalize` is called.
	pub fn record(&mut self, trial: SingleTrialResult) {
		self.num_attempts += 1;
		if trial.is_valid {
			self.num_successes += 1;
			self.total_task_performance += trial.task_metric;
		} else {
			self.failed_responses.push(trial.prompt_with_response.clone());
		}
		self.all_responses.push(trial.prompt_with_response);
	}

	/// Computes `success_rate` and `average_task_performance` from the totals.
	/// Safe to call repeatedly.
	pub fn finalize(&mut self) {
		if self.num_attempts == 0 {
			self.success_rate = 0.0;
			self.average_task_performance = 0.0;
			return;
		}
		let attempts = self.num_attempts as f64;
		self.success_rate = self.num_successes as f64 / attempts;
		self.average_task_performance = self.total_task_performance / attempts;
	}

	/// Stable file name for the persisted record. Unique per
	/// (task, model, provider, method, structured, trial), so records of
	/// different providers or trials can share a directory.
	pub fn file_name(&self) -> String {
		let mut name = format!(
			"{}-{}-{}-{}",
			sanitize(&self.test_name),
			sanitize(&self.model_name),
			sanitize(&self.model_provider),
			self.prompting_method
		);
		if self.structured_output {
			name.push_str("-structured");
		}
		if let Some(trial) = &self.trial {
			name.push('-');
			name.push_str(&sanitize(trial));
		}
		name.push_str(".json");
		name
	}

	pub fn summary_table(records: &[ExperimentRecord]) -> String {
		use tabled::Table;
		let rows: Vec<ExperimentRow> = records.iter().map(ExperimentRow::from).collect();
		Table::new(rows).to_string()
	}
}

fn sanitize(name: &str) -> String {
	name.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
		.collect()
}

#[derive(Debug, Clone, Tabled)]
struct ExperimentRow {
	test: String,
	model: String,
	provider: String,
	method: String,
	successes: String,
	success_rate: String,
	avg_task_performance: String,
	seconds: u64,
}

impl From<&ExperimentRecord> for ExperimentRow {
	fn from(r: &ExperimentRecord) -> Self {
		let method = if r.structured_output {
			format!("{} (structured)", r.prompting_method)
		} else {
			r.prompting_method.to_string()
		};
		Self {
			test: r.test_name.clone(),
			model: r.model_name.clone(),
			provider: r.model_provider.clone(),
			method,
			successes: format!("{}/{}", r.num_successes, r.num_attempts),
			success_rate: format!("{:.1}%", r.success_rate * 100.0),
			avg_task_performance: format!("{:.3}", r.average_task_performance),
			seconds: r.total_time,
		}
	}
}
