//! Folds experiment records into buckets keyed by an ordered list of
//! grouping dimensions.
//!
//! Records are read as raw JSON because the persisted shape changed over
//! time: older files carry one paired result per (task, model, provider)
//! with `dspy_score`/`fstring_score` and `total_questions`, newer ones carry
//! one prompting method each, and some carry split attempt counters instead
//! of `total_questions`. [`normalize`] is the only code that knows about
//! those shapes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use structeval_types::{AggregateBucket, BucketStatus, ExperimentRecord, PromptingMethod, RunScores};
use tabled::{Table, Tabled};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    TestType,
    ModelName,
    Provider,
    PromptingMethod,
    Trial,
}

pub const DEFAULT_DIMENSIONS: [Dimension; 3] = [Dimension::TestType, Dimension::ModelName, Dimension::Provider];

impl Dimension {
    /// Record fields holding this dimension, in order of preference.
    fn fields(&self) -> &'static [&'static str] {
        match self {
            Dimension::TestType => &["test_type", "test_name"],
            Dimension::ModelName => &["model_name"],
            Dimension::Provider => &["model_provider", "provider"],
            Dimension::PromptingMethod => &["prompting_method"],
            Dimension::Trial => &["trial"],
        }
    }

    pub fn name(&self) -> &'static str {
        self.fields()[0]
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dimension {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "task" | "test" | "test_type" | "test_name" => Ok(Dimension::TestType),
            "model" | "model_name" => Ok(Dimension::ModelName),
            "provider" | "model_provider" => Ok(Dimension::Provider),
            "method" | "prompting_method" => Ok(Dimension::PromptingMethod),
            "trial" => Ok(Dimension::Trial),
            other => Err(Error::Config(format!("unknown grouping dimension '{other}'"))),
        }
    }
}

/// A record reduced to its grouping key and bucket contribution.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub key: Vec<String>,
    pub scores: RunScores,
}

/// Questions attempted by one record: `total_questions` when present,
/// otherwise the largest of the attempt counters the record carries.
pub fn question_count(record: &Map<String, Value>) -> Option<f64> {
    if let Some(total) = number(record, "total_questions") {
        return Some(total);
    }
    ["dspy_total_attempts", "fstring_total_attempts", "num_attempts"]
        .iter()
        .filter_map(|k| number(record, k))
        .reduce(f64::max)
}

fn number(record: &Map<String, Value>, key: &str) -> Option<f64> {
    record.get(key).and_then(Value::as_f64)
}

fn label(record: &Map<String, Value>, dimension: Dimension) -> Option<String> {
    dimension.fields().iter().find_map(|k| match record.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

/// Reads one raw record. Fails with `MalformedRecord` naming the first
/// missing field and `source`.
pub fn normalize(dimensions: &[Dimension], source: &str, record: &Value) -> Result<NormalizedRecord> {
    let obj = record.as_object().ok_or_else(|| Error::malformed(source, "<object>"))?;

    let key = dimensions
        .iter()
        .map(|d| label(obj, *d).ok_or_else(|| Error::malformed(source, d.name())))
        .collect::<Result<Vec<_>>>()?;

    let questions = question_count(obj).ok_or_else(|| Error::malformed(source, "total_questions"))?;

    let paired = obj.contains_key("dspy_score") || obj.contains_key("fstring_score");
    let (dspy_score, fstring_score, attempts) = if paired {
        let split: Vec<f64> = ["dspy_total_attempts", "fstring_total_attempts"]
            .iter()
            .filter_map(|k| number(obj, k))
            .collect();
        let attempts = if split.is_empty() { 2.0 * questions } else { split.iter().sum() };
        (
            number(obj, "dspy_score").unwrap_or(0.0),
            number(obj, "fstring_score").unwrap_or(0.0),
            attempts,
        )
    } else {
        let successes = number(obj, "num_successes").ok_or_else(|| Error::malformed(source, "num_successes"))?;
        let method = obj
            .get("prompting_method")
            .and_then(Value::as_str)
            .and_then(|m| m.parse::<PromptingMethod>().ok())
            .ok_or_else(|| Error::malformed(source, "prompting_method"))?;
        let attempts = number(obj, "num_attempts").unwrap_or(questions);
        match method {
            PromptingMethod::Dspy => (successes, 0.0, attempts),
            PromptingMethod::Fstring => (0.0, successes, attempts),
        }
    };
    let successes = dspy_score + fstring_score;
    let task_performance = number(obj, "average_task_performance")
        .unwrap_or_else(|| ratio(number(obj, "total_task_performance").unwrap_or(0.0), attempts));

    Ok(NormalizedRecord {
        key,
        scores: RunScores {
            dspy_score,
            fstring_score,
            questions,
            task_performance,
            success_rate: number(obj, "success_rate").unwrap_or_else(|| ratio(successes, attempts)),
            successes,
        },
    })
}

pub struct Aggregator {
    dimensions: Vec<Dimension>,
    buckets: BTreeMap<Vec<String>, AggregateBucket>,
}

impl Aggregator {
    /// Fails with `Error::Config` when `dimensions` is empty.
    pub fn new(dimensions: Vec<Dimension>) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(Error::Config("at least one grouping dimension is required".into()));
        }
        Ok(Self { dimensions, buckets: BTreeMap::new() })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Folds one raw record. Nothing is touched unless the whole record
    /// normalizes.
    pub fn fold(&mut self, source: &str, record: &Value) -> Result<()> {
        let normalized = normalize(&self.dimensions, source, record)?;
        self.buckets.entry(normalized.key).or_default().add_run(&normalized.scores);
        Ok(())
    }

    pub fn fold_record(&mut self, source: &str, record: &ExperimentRecord) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.fold(source, &value)
    }

    /// Makes sure a group is reported even if no record lands in it.
    pub fn expect_group(&mut self, key: Vec<String>) -> Result<()> {
        if key.len() != self.dimensions.len() {
            return Err(Error::Config(format!(
                "group key has {} part(s), expected {}",
                key.len(),
                self.dimensions.len()
            )));
        }
        self.buckets.entry(key).or_default();
        Ok(())
    }

    pub fn finish(mut self) -> Summary {
        for bucket in self.buckets.values_mut() {
            bucket.finalize();
        }
        Summary { dimensions: self.dimensions, buckets: self.buckets }
    }
}

/// One-shot aggregation over `(source, record)` pairs.
pub fn aggregate<'a, I>(dimensions: &[Dimension], records: I) -> Result<Summary>
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut aggregator = Aggregator::new(dimensions.to_vec())?;
    for (source, record) in records {
        aggregator.fold(source, record)?;
    }
    Ok(aggregator.finish())
}

#[derive(Debug, Clone)]
pub struct Summary {
    dimensions: Vec<Dimension>,
    buckets: BTreeMap<Vec<String>, AggregateBucket>,
}

#[derive(Tabled)]
struct SummaryRow {
    group: String,
    runs: u64,
    avg_questions: String,
    dspy: String,
    fstring: String,
    success_rate: String,
    task_performance: String,
    status: String,
}

impl Summary {
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn get(&self, key: &[&str]) -> Option<&AggregateBucket> {
        let key: Vec<String> = key.iter().map(|s| s.to_string()).collect();
        self.buckets.get(&key)
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&[String], &AggregateBucket)> {
        self.buckets.iter().map(|(k, b)| (k.as_slice(), b))
    }

    /// Groups where no run produced a single valid response.
    pub fn zero_success_groups(&self) -> Vec<&[String]> {
        self.buckets
            .iter()
            .filter(|(_, b)| b.successful_runs == 0)
            .map(|(k, _)| k.as_slice())
            .collect()
    }

    /// Nested map, one level per dimension, with the bucket at the leaf.
    pub fn to_nested_json(&self) -> Value {
        let mut root = Map::new();
        'groups: for (key, bucket) in &self.buckets {
            let Some((leaf, path)) = key.split_last() else {
                continue;
            };
            let mut node = &mut root;
            for part in path {
                let child = node
                    .entry(part.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                // every key has the same length, so inner nodes are objects
                let Value::Object(map) = child else {
                    continue 'groups;
                };
                node = map;
            }
            node.insert(
                leaf.clone(),
                serde_json::to_value(bucket).unwrap_or(Value::Null),
            );
        }
        Value::Object(root)
    }

    pub fn summary_table(&self) -> String {
        let rows: Vec<SummaryRow> = self
            .buckets
            .iter()
            .map(|(key, b)| SummaryRow {
                group: key.join(" / "),
                runs: b.runs,
                avg_questions: format!("{:.2}", b.average_questions),
                dspy: format!("{:.2} ({:.1}%)", b.dspy_average, b.dspy_fraction() * 100.0),
                fstring: format!("{:.2} ({:.1}%)", b.fstring_average, b.fstring_fraction() * 100.0),
                success_rate: format!("{:.1}%", b.average_success_rate * 100.0),
                task_performance: format!("{:.3}", b.average_task_performance),
                status: match b.status {
                    BucketStatus::Ok if b.successful_runs == 0 => "no successes".to_string(),
                    BucketStatus::Ok => "ok".to_string(),
                    BucketStatus::NotApplicable => "n/a".to_string(),
                },
            })
            .collect();
        Table::new(rows).to_string()
    }
}
