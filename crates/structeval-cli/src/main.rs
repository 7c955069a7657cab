use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use structeval_core::store::Store;
use structeval_core::{
	datasource, persist, providers, report, Aggregator, DataSource, Dimension, Experiment, ModelConfig, ModelJudge,
	PromptingMethod, Provider, Registry, RunConfig, Scorer, DEFAULT_DIMENSIONS,
};

#[derive(Debug, Parser)]
#[command(name = "structeval", about = "Measure structured-output reliability of language models")]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	/// Increase verbosity (-v, -vv, -vvv)
	#[arg(short, long, action = ArgAction::Count, global = true)]
	verbose: u8,

	/// Suppress non-error output
	#[arg(short, long, global = true)]
	quiet: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Run one task against one model for every prompting method
	Run(RunArgs),
	/// Fold saved experiment records into a summary
	Aggregate(AggregateArgs),
	/// List the registered tasks and their response formats
	Tasks {
		/// Categories file, to include the classification tasks
		#[arg(long)]
		categories: Option<PathBuf>,
	},
	/// List the runs saved in a SQLite database
	Runs {
		/// Database written by `run --db`
		#[arg(long)]
		db: PathBuf,
	},
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// YAML run configuration; flags below override its values
	#[arg(long)]
	config: Option<PathBuf>,

	/// Task id, e.g. AssessAnswerability
	#[arg(long)]
	task: Option<String>,

	/// Model name as the provider knows it
	#[arg(long)]
	model: Option<String>,

	/// ollama, openai or anthropic
	#[arg(long)]
	provider: Option<Provider>,

	/// Base URL override for the model provider
	#[arg(long)]
	base_url: Option<String>,

	/// JSON array or JSONL dataset
	#[arg(long)]
	dataset: Option<PathBuf>,

	/// Categories file for classification tasks: {"name": {"category_description": ...}}
	#[arg(long)]
	categories: Option<PathBuf>,

	/// Prompting methods to run (repeatable); defaults to all
	#[arg(long = "method")]
	methods: Vec<PromptingMethod>,

	/// Also run with schema-constrained decoding
	#[arg(long, action = ArgAction::SetTrue)]
	structured: bool,

	/// Only run with schema-constrained decoding
	#[arg(long, action = ArgAction::SetTrue, conflicts_with = "structured")]
	structured_only: bool,

	/// Concurrency (trials in-flight)
	#[arg(long)]
	concurrency: Option<usize>,

	/// Per-trial timeout in seconds
	#[arg(long)]
	timeout_secs: Option<u64>,

	/// Only use the first N dataset items
	#[arg(long)]
	limit: Option<usize>,

	/// Directory the experiment records are written to
	#[arg(long)]
	save_dir: Option<PathBuf>,

	/// Trial label stored on every record
	#[arg(long)]
	trial: Option<String>,

	/// Judge provider for tasks scored against a reference answer
	#[arg(long, requires = "judge_model")]
	judge_provider: Option<Provider>,

	/// Judge model name
	#[arg(long, requires = "judge_provider")]
	judge_model: Option<String>,

	/// Also save the records into this SQLite database
	#[arg(long)]
	db: Option<PathBuf>,
}

#[derive(Debug, Clone, Parser)]
struct AggregateArgs {
	/// Directory of experiment records (searched recursively)
	#[arg(default_value = "results")]
	dir: PathBuf,

	/// Read records from this SQLite database instead of the directory
	#[arg(long)]
	db: Option<PathBuf>,

	/// Grouping dimensions: task, model, provider, method, trial
	#[arg(long, value_delimiter = ',')]
	group_by: Vec<Dimension>,

	/// Summary JSON output
	#[arg(long, default_value = persist::SUMMARY_FILE)]
	out: PathBuf,

	/// Also write an HTML report
	#[arg(long)]
	html: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let level = match (cli.quiet, cli.verbose) {
		(true, _) => tracing::Level::ERROR,
		(_, 0) => tracing::Level::WARN,
		(_, 1) => tracing::Level::INFO,
		(_, 2) => tracing::Level::DEBUG,
		(_, _) => tracing::Level::TRACE,
	};
	tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

	match cli.command {
		Commands::Run(args) => run(args).await?,
		Commands::Aggregate(args) => aggregate(args).await?,
		Commands::Tasks { categories } => tasks(categories).await?,
		Commands::Runs { db } => runs(db)?,
	}
	Ok(())
}

fn resolve_config(args: &RunArgs) -> Result<RunConfig> {
	let mut config = match &args.config {
		Some(path) => RunConfig::from_yaml_file(path)?,
		None => {
			let task = args.task.clone().context("--task is required without --config")?;
			let model = args.model.clone().context("--model is required without --config")?;
			let provider = args.provider.context("--provider is required without --config")?;
			let dataset = args.dataset.clone().context("--dataset is required without --config")?;
			RunConfig::new(task, ModelConfig::new(provider, model), dataset)
		}
	};

	if let Some(task) = &args.task {
		config.task = task.clone();
	}
	if let Some(provider) = args.provider {
		config.model.provider = provider;
	}
	if let Some(model) = &args.model {
		config.model.name = model.clone();
	}
	if args.base_url.is_some() {
		config.model.base_url = args.base_url.clone();
	}
	if let Some(dataset) = &args.dataset {
		config.data.path = dataset.clone();
	}
	if args.categories.is_some() {
		config.data.categories = args.categories.clone();
	}
	if args.limit.is_some() {
		config.data.limit = args.limit;
	}
	if !args.methods.is_empty() {
		config.methods = args.methods.clone();
	}
	if args.structured {
		config.structured_variants = vec![false, true];
	} else if args.structured_only {
		config.structured_variants = vec![true];
	}
	if let Some(n) = args.concurrency {
		config.concurrency = n;
	}
	if let Some(secs) = args.timeout_secs {
		config.timeout_secs = secs;
	}
	if let Some(dir) = &args.save_dir {
		config.save_dir = dir.clone();
	}
	if args.trial.is_some() {
		config.trial = args.trial.clone();
	}
	if let (Some(provider), Some(model)) = (args.judge_provider, &args.judge_model) {
		config.judge = Some(ModelConfig::new(provider, model.clone()));
	}

	config.validate()?;
	Ok(config)
}

async fn build_registry(categories: Option<&PathBuf>) -> Result<Registry> {
	let registry = Registry::builtin();
	match categories {
		Some(path) => {
			let categories = datasource::load_categories(path).await?;
			Ok(registry.with_categories(categories)?)
		}
		None => Ok(registry),
	}
}

async fn run(args: RunArgs) -> Result<()> {
	let config = resolve_config(&args)?;
	let timeout = Duration::from_secs(config.timeout_secs);
	let registry = Arc::new(build_registry(config.data.categories.as_ref()).await?);

	let client = providers::build_client(&config.model, timeout)?;
	let scorer = match &config.judge {
		Some(judge) => {
			let judge_client = providers::build_client(judge, timeout)?;
			Scorer::with_judge(Arc::new(ModelJudge::new(judge_client, &registry)?))
		}
		None => Scorer::new(),
	};
	let data: Arc<dyn DataSource> = Arc::from(datasource::from_path(&config.data.path));

	let experiment = Experiment::builder()
		.registry(registry)
		.task(&config.task)
		.data_source(data)
		.client(client)
		.scorer(Arc::new(scorer))
		.model(&config.model.name, config.model.provider.as_str())
		.trial(config.trial.clone())
		.concurrency(config.concurrency)
		.timeout(timeout)
		.limit(config.data.limit)
		.build()?;

	let records = experiment.run_all(&config.methods, &config.structured_variants).await?;

	for record in &records {
		let path = persist::save_record(&config.save_dir, record).await?;
		tracing::info!(path = %path.display(), "wrote record");
	}
	println!("{}", structeval_core::ExperimentRecord::summary_table(&records));

	if let Some(db) = &args.db {
		let store = Store::open(db).with_context(|| format!("Failed to open {:?}", db))?;
		let run_id = store.create_run(Some(json!({
			"task": config.task,
			"model": config.model.name,
			"provider": config.model.provider.as_str(),
			"trial": config.trial,
		})))?;
		for record in &records {
			store.save_experiment(run_id, record)?;
		}
		tracing::info!(run_id, db = %db.display(), "saved run");
	}

	Ok(())
}

async fn aggregate(args: AggregateArgs) -> Result<()> {
	let dimensions = if args.group_by.is_empty() { DEFAULT_DIMENSIONS.to_vec() } else { args.group_by };

	let records = match &args.db {
		Some(db) => Store::open(db)
			.with_context(|| format!("Failed to open {:?}", db))?
			.experiment_values()?,
		None => persist::load_record_values(&args.dir).await?,
	};

	let mut aggregator = Aggregator::new(dimensions)?;
	for (source, record) in &records {
		aggregator.fold(source, record)?;
	}
	let summary = aggregator.finish();

	persist::write_summary(&args.out, &summary).await?;
	println!("{}", summary.summary_table());

	for group in summary.zero_success_groups() {
		tracing::warn!(group = %group.join(" / "), "no successful run in group");
	}

	if let Some(path) = &args.html {
		tokio::fs::write(path, report::generate_html_report(&summary))
			.await
			.with_context(|| format!("Failed to write {:?}", path))?;
	}

	tracing::info!(records = records.len(), groups = summary.len(), out = %args.out.display(), "aggregated");
	Ok(())
}

async fn tasks(categories: Option<PathBuf>) -> Result<()> {
	let registry = build_registry(categories.as_ref()).await?;
	for id in registry.task_ids() {
		let contract = registry.lookup(id)?;
		println!("{id}\n    {}", contract.response_format.describe());
	}
	Ok(())
}

fn runs(db: PathBuf) -> Result<()> {
	let store = Store::open(&db).with_context(|| format!("Failed to open {:?}", db))?;
	for run in store.runs()? {
		let metadata = run.metadata.map(|m| m.to_string()).unwrap_or_default();
		println!("{}\t{}\t{}", run.id, run.created_at.to_rfc3339(), metadata);
	}
	Ok(())
}
