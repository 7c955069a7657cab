//! structeval-core: measures how reliably language models return JSON that
//! matches a per-task response contract, and how good the answers are.
//! Register task contracts, pick a data source and a model client, run the
//! prompting-method variants concurrently, then aggregate the saved records.

pub mod aggregate;
pub mod config;
pub mod datasource;
pub mod error;
pub mod model;
pub mod persist;
pub mod prompt;
pub mod providers;
pub mod registry;
pub mod report;
pub mod runner;
pub mod schema;
pub mod scorer;
pub mod testing;
pub mod validator;

pub use aggregate::{aggregate, Aggregator, Dimension, Summary, DEFAULT_DIMENSIONS};
pub use config::{DataConfig, ModelConfig, Provider, RunConfig};
pub use datasource::{DataSource, JsonDataSource, JsonlDataSource, VecDataSource};
pub use error::{Error, Result};
pub use model::{from_async_fn, ModelClient, StaticClient};
pub use registry::{Category, Registry, TaskContract};
pub use runner::{Experiment, ExperimentBuilder};
pub use schema::{Field, ResponseFormat, ValueType, Violation};
pub use scorer::{Judge, ModelJudge, Scorer};
pub use validator::{validate_contract, ValidationOutcome, Validator};

pub use structeval_types::{
    AggregateBucket, BucketStatus, DatasetItem, ExperimentRecord, PromptWithResponse, PromptingMethod,
    SingleTrialResult,
};

#[cfg(feature = "persistence")]
pub use structeval_store as store;
