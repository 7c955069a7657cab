use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use structeval_types::{DatasetItem, ExperimentRecord, PromptingMethod, SingleTrialResult};

use crate::datasource::DataSource;
use crate::model::ModelClient;
use crate::prompt;
use crate::registry::{Registry, TaskContract};
use crate::scorer::Scorer;
use crate::validator::validate_contract;

pub struct ExperimentBuilder {
	registry: Arc<Registry>,
	task: Option<String>,
	data_source: Option<Arc<dyn DataSource>>,
	client: Option<Arc<dyn ModelClient>>,
	scorer: Arc<Scorer>,
	model_name: String,
	provider: String,
	trial: Option<String>,
	concurrency: usize,
	timeout: Duration,
	limit: Option<usize>,
}

impl ExperimentBuilder {
	pub fn new() -> Self {
		Self {
			registry: Arc::new(Registry::builtin()),
			task: None,
			data_source: None,
			client: None,
			scorer: Arc::new(Scorer::new()),
			model_name: String::new(),
			provider: String::new(),
			trial: None,
			concurrency: 8,
			timeout: Duration::from_secs(120),
			limit: None,
		}
	}

	pub fn registry(mut self, registry: Arc<Registry>) -> Self {
		self.registry = registry;
		self
	}

	pub fn task(mut self, task_id: impl Into<String>) -> Self {
		self.task = Some(task_id.into());
		self
	}

	pub fn data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
		self.data_source = Some(data_source);
		self
	}

	pub fn client(mut self, client: Arc<dyn ModelClient>) -> Self {
		self.client = Some(client);
		self
	}

	pub fn scorer(mut self, scorer: Arc<Scorer>) -> Self {
		self.scorer = scorer;
		self
	}

	pub fn model(mut self, model_name: impl Into<String>, provider: impl Into<String>) -> Self {
		self.model_name = model_name.into();
		self.provider = provider.into();
		self
	}

	pub fn trial(mut self, trial: Option<String>) -> Self {
		self.trial = trial;
		self
	}

	pub fn concurrency(mut self, n: usize) -> Self {
		self.concurrency = n.max(1);
		self
	}

	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn limit(mut self, limit: Option<usize>) -> Self {
		self.limit = limit;
		self
	}

	/// Resolves the task contract, so an unknown task fails here, before any
	/// trial runs.
	pub fn build(self) -> crate::Result<Experiment> {
		let task = self.task.ok_or_else(|| crate::Error::Config("task must be set".into()))?;
		let contract = self.registry.lookup(&task)?.clone();
		Ok(Experiment {
			contract,
			data_source: self
				.data_source
				.ok_or_else(|| crate::Error::Config("data_source must be set".into()))?,
			client: self.client.ok_or_else(|| crate::Error::Config("client must be set".into()))?,
			scorer: self.scorer,
			model_name: self.model_name,
			provider: self.provider,
			trial: self.trial,
			concurrency: self.concurrency,
			timeout: self.timeout,
			limit: self.limit,
		})
	}
}

impl Default for ExperimentBuilder {
	fn default() -> Self {
		Self::new()
	}
}

pub struct Experiment {
	contract: TaskContract,
	data_source: Arc<dyn DataSource>,
	client: Arc<dyn ModelClient>,
	scorer: Arc<Scorer>,
	model_name: String,
	provider: String,
	trial: Option<String>,
	concurrency: usize,
	timeout: Duration,
	limit: Option<usize>,
}

impl Experiment {
	pub fn builder() -> ExperimentBuilder {
		ExperimentBuilder::new()
	}

	pub fn contract(&self) -> &TaskContract {
		&self.contract
	}

	/// One record per (method, structured variant), in the order given.
	pub async fn run_all(&self, methods: &[PromptingMethod], structured_variants: &[bool]) -> Result<Vec<ExperimentRecord>> {
		let items = self.load_items().await?;
		let mut records = Vec::with_capacity(methods.len() * structured_variants.len());
		for &method in methods {
			for &structured in structured_variants {
				records.push(self.run_items(&items, method, structured).await);
			}
		}
		Ok(records)
	}

	pub async fn run(&self, method: PromptingMethod, structured: bool) -> Result<ExperimentRecord> {
		let items = self.load_items().await?;
		Ok(self.run_items(&items, method, structured).await)
	}

	async fn load_items(&self) -> Result<Vec<DatasetItem>> {
		let mut items = self.data_source.load().await?;
		if let Some(limit) = self.limit {
			items.truncate(limit);
		}
		Ok(items)
	}

	async fn run_items(&self, items: &[DatasetItem], method: PromptingMethod, structured: bool) -> ExperimentRecord {
		tracing::info!(
			task = %self.contract.id,
			model = %self.model_name,
			provider = %self.provider,
			%method,
			structured,
			items = items.len(),
			"starting experiment"
		);
		let started = Instant::now();
		let schema = structured.then(|| self.contract.response_format.json_schema());

		let trials: Vec<SingleTrialResult> = stream::iter(items.iter())
			.map(|item| self.run_trial(method, schema.as_ref(), item))
			.buffered(self.concurrency)
			.collect()
			.await;

		// single writer: trials are recorded here, in input order
		let mut record = ExperimentRecord::new(&self.contract.id, &self.model_name, &self.provider, method)
			.with_structured_output(structured)
			.with_trial(self.trial.clone());
		for trial in trials {
			record.record(trial);
		}
		record.total_time = started.elapsed().as_secs();
		record.finalize();

		tracing::info!(
			task = %record.test_name,
			%method,
			structured,
			successes = record.num_successes,
			attempts = record.num_attempts,
			success_rate = record.success_rate,
			average_task_performance = record.average_task_performance,
			"finished experiment"
		);
		record
	}

	async fn run_trial(&self, method: PromptingMethod, schema: Option<&Value>, item: &DatasetItem) -> SingleTrialResult {
		let references = prompt::references_for(&self.contract, item);
		let prompt = prompt::render(method, &self.contract, &references);

		let response = match tokio::time::timeout(self.timeout, self.client.complete(&prompt, schema)).await {
			Ok(Ok(text)) => text,
			Ok(Err(err)) => {
				tracing::warn!(task = %self.contract.id, error = %err, "model call failed");
				return SingleTrialResult::errored(prompt, err);
			}
			Err(_) => {
				tracing::warn!(task = %self.contract.id, timeout = ?self.timeout, "model call timed out");
				return SingleTrialResult::errored(prompt, format!("timed out after {:?}", self.timeout));
			}
		};

		let outcome = validate_contract(&self.contract, &response);
		let parsed = match outcome.parsed_value {
			Some(v) if outcome.is_structurally_valid => v,
			_ => {
				tracing::debug!(
					task = %self.contract.id,
					violation = %outcome.violation.map(|v| v.to_string()).unwrap_or_default(),
					"invalid output"
				);
				return SingleTrialResult::new(prompt, response, false, 0.0);
			}
		};

		match self.scorer.score(&self.contract, &parsed, item).await {
			Ok(metric) => SingleTrialResult::new(prompt, response, true, metric),
			Err(err) => {
				tracing::warn!(task = %self.contract.id, error = %err, "scoring failed");
				SingleTrialResult::errored(prompt, err)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::datasource::VecDataSource;
	use crate::model::{from_async_fn, StaticClient};
	use crate::registry::{ASSESS_ANSWERABILITY, RATE_CONTEXT};
	use structeval_types::ERROR_SENTINEL;

	fn items() -> Vec<DatasetItem> {
		vec![
			DatasetItem::qa("Paris is in France.", "Where is Paris?", "France").with_answerable(true),
			DatasetItem::qa("", "What is the moon made of?", "").with_answerable(false),
			DatasetItem::qa("Water boils at 100C.", "When does water boil?", "100C").with_answerable(true),
		]
	}

	fn builder(client: Arc<dyn ModelClient>) -> ExperimentBuilder {
		Experiment::builder()
			.task(ASSESS_ANSWERABILITY)
			.data_source(Arc::new(VecDataSource::new(items())))
			.client(client)
			.model("m1", "p1")
	}

	#[tokio::test]
	async fn records_success_and_task_metric() {
		let experiment = builder(Arc::new(StaticClient::new(r#"{"answerable_question": true}"#)))
			.build()
			.unwrap();
		let record = experiment.run(PromptingMethod::Fstring, false).await.unwrap();
		assert_eq!(record.num_attempts, 3);
		assert_eq!(record.num_successes, 3);
		assert_eq!(record.total_task_performance, 2.0);
		assert_eq!(record.success_rate, 1.0);
		assert!((record.average_task_performance - 2.0 / 3.0).abs() < 1e-12);
		assert_eq!(record.model_provider, "p1");
		assert!(record.failed_responses.is_empty());
	}

	#[tokio::test]
	async fn errors_and_invalid_output_become_failed_trials() {
		let client = from_async_fn(|prompt, _| async move {
			if prompt.contains("moon") {
				anyhow::bail!("connection reset");
			}
			if prompt.contains("water") {
				return Ok("```json\n{\"answerable_question\": true}\n```".to_string());
			}
			Ok(r#"{"answerable_question": true}"#.to_string())
		});
		let record = builder(client).build().unwrap().run(PromptingMethod::Dspy, false).await.unwrap();
		assert_eq!(record.num_attempts, 3);
		assert_eq!(record.num_successes, 1);
		assert_eq!(record.failed_responses.len(), 2);
		assert!(record.failed_responses.iter().any(|f| f.response.starts_with(ERROR_SENTINEL)));
		// order follows the dataset
		assert!(record.all_responses[1].response.starts_with(ERROR_SENTINEL));
	}

	#[tokio::test]
	async fn slow_calls_time_out() {
		let client = from_async_fn(|_, _| async move {
			tokio::time::sleep(Duration::from_secs(5)).await;
			Ok(r#"{"answerable_question": true}"#.to_string())
		});
		let record = builder(client)
			.timeout(Duration::from_millis(20))
			.build()
			.unwrap()
			.run(PromptingMethod::Fstring, false)
			.await
			.unwrap();
		assert_eq!(record.num_successes, 0);
		assert_eq!(record.failed_responses.len(), 3);
		assert!(record.failed_responses[0].response.contains("timed out"));
	}

	#[tokio::test]
	async fn unknown_task_fails_before_running() {
		let result = Experiment::builder()
			.task("RateMultipleAspects")
			.data_source(Arc::new(VecDataSource::new(items())))
			.client(Arc::new(StaticClient::new("{}")))
			.build();
		assert!(matches!(result, Err(crate::Error::UnknownTask(_))));
	}

	#[tokio::test]
	async fn structured_variant_sends_schema() {
		let client = from_async_fn(|_, schema| async move {
			let schema = schema.ok_or_else(|| anyhow::anyhow!("schema missing"))?;
			assert_eq!(schema["properties"]["context_score"]["type"], "integer");
			Ok(r#"{"context_score": 4}"#.to_string())
		});
		let records = builder(client)
			.task(RATE_CONTEXT)
			.limit(Some(2))
			.build()
			.unwrap()
			.run_all(&[PromptingMethod::Dspy], &[true])
			.await
			.unwrap();
		assert_eq!(records.len(), 1);
		assert!(records[0].structured_output);
		assert_eq!(records[0].num_successes, 2);
		assert_eq!(records[0].total_task_performance, 0.0);
	}

	#[tokio::test]
	async fn run_all_emits_one_record_per_configuration() {
		let records = builder(Arc::new(StaticClient::new("nope")))
			.trial(Some("trial-2".into()))
			.build()
			.unwrap()
			.run_all(&PromptingMethod::ALL, &[false, true])
			.await
			.unwrap();
		assert_eq!(records.len(), 4);
		assert!(records.iter().all(|r| r.num_successes == 0 && r.num_attempts == 3));
		assert!(records.iter().all(|r| r.trial.as_deref() == Some("trial-2")));
		assert_eq!(records[0].prompting_method, PromptingMethod::Dspy);
		assert_eq!(records[3].prompting_method, PromptingMethod::Fstring);
	}
}
