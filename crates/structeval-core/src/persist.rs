//! Result files on disk: one JSON file per experiment, read back
//! recursively for aggregation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use structeval_types::ExperimentRecord;

use crate::aggregate::Summary;

pub const SUMMARY_FILE: &str = "aggregated_results.json";

/// Writes `record` as `<dir>/<record.file_name()>`, creating `dir` if needed.
pub async fn save_record(dir: &Path, record: &ExperimentRecord) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {:?}", dir))?;
    let path = dir.join(record.file_name());
    let body = serde_json::to_string_pretty(record)?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    tracing::debug!(path = %path.display(), "saved experiment record");
    Ok(path)
}

/// Every `*.json` under `dir`, as `(path, value)` sorted by path.
///
/// Files inside a subdirectory of `dir` get the subdirectory name as their
/// `trial` when they carry none. Summary files are skipped.
pub async fn load_record_values(dir: &Path) -> Result<Vec<(String, Value)>> {
    let mut files = Vec::new();
    collect_json_files(dir, &mut files).await?;
    files.sort();

    let mut out = Vec::with_capacity(files.len());
    for path in files {
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let mut value: Value =
            serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))?;
        if let Some(trial) = trial_label(dir, &path) {
            if let Some(obj) = value.as_object_mut() {
                obj.entry("trial").or_insert(Value::String(trial));
            }
        }
        out.push((path.display().to_string(), value));
    }
    Ok(out)
}

fn trial_label(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components();
    let first = components.next()?;
    // a bare file directly under the root has no trial directory
    components.next()?;
    Some(first.as_os_str().to_string_lossy().into_owned())
}

async fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .with_context(|| format!("Failed to list {:?}", current))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("json")
                && path.file_name().and_then(|n| n.to_str()) != Some(SUMMARY_FILE)
            {
                out.push(path);
            }
        }
    }
    Ok(())
}

pub async fn write_summary(path: &Path, summary: &Summary) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_string_pretty(&summary.to_nested_json())?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, Dimension};
    use structeval_types::{PromptingMethod, SingleTrialResult};
    use tempfile::tempdir;

    fn record(method: PromptingMethod) -> ExperimentRecord {
        let mut r = ExperimentRecord::new("RateContext", "llama3.2:3b", "ollama", method);
        r.record(SingleTrialResult::new("p", r#"{"context_score": 4}"#, true, 0.0));
        r.finalize();
        r
    }

    #[tokio::test]
    async fn saved_records_read_back() {
        let dir = tempdir().unwrap();
        let path = save_record(dir.path(), &record(PromptingMethod::Dspy)).await.unwrap();
        assert!(path.ends_with("RateContext-llama3.2_3b-ollama-dspy.json"));

        let values = load_record_values(dir.path()).await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].1["num_successes"], 1);
        assert!(values[0].1.get("trial").is_none());
    }

    #[tokio::test]
    async fn subdirectories_name_the_trial() {
        let dir = tempdir().unwrap();
        save_record(&dir.path().join("trial-2"), &record(PromptingMethod::Fstring)).await.unwrap();
        let labelled = record(PromptingMethod::Dspy).with_trial(Some("explicit".into()));
        save_record(&dir.path().join("trial-2"), &labelled).await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored").await.unwrap();
        tokio::fs::write(dir.path().join(SUMMARY_FILE), "{}").await.unwrap();

        let values = load_record_values(dir.path()).await.unwrap();
        assert_eq!(values.len(), 2);
        let trials: Vec<&str> = values.iter().map(|(_, v)| v["trial"].as_str().unwrap()).collect();
        assert!(trials.contains(&"trial-2"));
        assert!(trials.contains(&"explicit"));
    }

    #[tokio::test]
    async fn providers_and_trials_share_a_directory() {
        let dir = tempdir().unwrap();
        for provider in ["ollama", "openai"] {
            for trial in ["trial-1", "trial-2"] {
                let r = ExperimentRecord { model_provider: provider.into(), ..record(PromptingMethod::Dspy) }
                    .with_trial(Some(trial.into()));
                save_record(dir.path(), &r).await.unwrap();
            }
        }

        let values = load_record_values(dir.path()).await.unwrap();
        assert_eq!(values.len(), 4);

        let dims = [Dimension::TestType, Dimension::ModelName];
        let summary = aggregate(&dims, values.iter().map(|(s, v)| (s.as_str(), v))).unwrap();
        assert_eq!(summary.get(&["RateContext", "llama3.2:3b"]).unwrap().runs, 4);
    }

    #[tokio::test]
    async fn invalid_json_names_the_file() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("broken.json"), "{").await.unwrap();
        let err = load_record_values(dir.path()).await.unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
    }
}
