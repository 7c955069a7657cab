use std::sync::Arc;

use serde_json::{json, Value};
use structeval_core::aggregate::{aggregate, Dimension, DEFAULT_DIMENSIONS};
use structeval_core::registry::ASSESS_ANSWERABILITY;
use structeval_core::{
    from_async_fn, persist, BucketStatus, Error, Experiment, JsonDataSource, PromptingMethod,
};
use tempfile::tempdir;

const DATASET: &str = r#"[
    {"title": "France", "context": "Paris is the capital of France.", "question": "What is the capital of France?", "answer": "Paris", "answerable": true},
    {"title": "Mars", "context": "Mars is the fourth planet.", "question": "Who first walked on Mars?", "answer": "", "answerable": false},
    {"title": "Rivers", "context": "The Nile flows north.", "question": "Which way does the Nile flow?", "answer": "North", "answerable": true},
    {"title": "Empty", "context": "", "question": "What is in the box?", "answer": "", "answerable": false}
]"#;

fn values_refs(values: &[(String, Value)]) -> impl Iterator<Item = (&str, &Value)> {
    values.iter().map(|(s, v)| (s.as_str(), v))
}

#[tokio::test]
async fn run_save_and_aggregate() {
    let dir = tempdir().unwrap();
    let dataset = dir.path().join("wiki.json");
    tokio::fs::write(&dataset, DATASET).await.unwrap();
    let results = dir.path().join("results");

    // answers "answerable" for every item, and breaks the format on Mars
    let client = from_async_fn(|prompt, _| async move {
        if prompt.contains("Mars") {
            return Ok("The answer is yes".to_string());
        }
        Ok(r#"{"answerable_question": true}"#.to_string())
    });

    let experiment = Experiment::builder()
        .task(ASSESS_ANSWERABILITY)
        .data_source(Arc::new(JsonDataSource::new(&dataset)))
        .client(client)
        .model("llama3.2:3b", "ollama")
        .concurrency(2)
        .build()
        .unwrap();
    let records = experiment.run_all(&PromptingMethod::ALL, &[false]).await.unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.num_attempts, 4);
        assert_eq!(record.num_successes, 3);
        // France and Nile are answerable, the empty box is not
        assert_eq!(record.total_task_performance, 2.0);
        assert_eq!(record.average_task_performance, 0.5);
        persist::save_record(&results.join("trial-1"), record).await.unwrap();
    }

    // an older paired file sits next to the trial directory
    tokio::fs::write(
        results.join("AssessAnswerability-legacy.json"),
        json!({
            "test_type": "AssessAnswerability",
            "model_name": "llama3.2:3b",
            "model_provider": "ollama",
            "dspy_score": 4,
            "fstring_score": 2,
            "dspy_total_attempts": 4,
            "fstring_total_attempts": 4,
        })
        .to_string(),
    )
    .await
    .unwrap();

    let values = persist::load_record_values(&results).await.unwrap();
    assert_eq!(values.len(), 3);

    let summary = aggregate(&DEFAULT_DIMENSIONS, values_refs(&values)).unwrap();
    assert_eq!(summary.len(), 1);
    let bucket = summary.get(&["AssessAnswerability", "llama3.2:3b", "ollama"]).unwrap();
    assert_eq!(bucket.runs, 3);
    assert_eq!(bucket.dspy_total, 3.0 + 4.0);
    assert_eq!(bucket.fstring_total, 3.0 + 2.0);
    assert_eq!(bucket.average_questions, 4.0);
    assert_eq!(bucket.status, BucketStatus::Ok);

    let out = dir.path().join("aggregated_results.json");
    persist::write_summary(&out, &summary).await.unwrap();
    let written: Value = serde_json::from_str(&tokio::fs::read_to_string(&out).await.unwrap()).unwrap();
    assert_eq!(written["AssessAnswerability"]["llama3.2:3b"]["ollama"]["runs"], 3);
}

#[tokio::test]
async fn trial_directories_group_by_trial() {
    let dir = tempdir().unwrap();
    let client = from_async_fn(|_, _| async move { Ok(r#"{"answerable_question": false}"#.to_string()) });
    let dataset = dir.path().join("wiki.json");
    tokio::fs::write(&dataset, DATASET).await.unwrap();

    for trial in ["trial-1", "trial-2"] {
        let experiment = Experiment::builder()
            .task(ASSESS_ANSWERABILITY)
            .data_source(Arc::new(JsonDataSource::new(&dataset)))
            .client(client.clone())
            .model("gpt-4o-mini", "openai")
            .build()
            .unwrap();
        let record = experiment.run(PromptingMethod::Fstring, false).await.unwrap();
        persist::save_record(&dir.path().join("results").join(trial), &record).await.unwrap();
    }

    let values = persist::load_record_values(&dir.path().join("results")).await.unwrap();
    let dims = [Dimension::TestType, Dimension::Trial];
    let summary = aggregate(&dims, values_refs(&values)).unwrap();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary.get(&["AssessAnswerability", "trial-2"]).unwrap().fstring_total, 4.0);
}

#[tokio::test]
async fn empty_directory_gives_empty_summary() {
    let dir = tempdir().unwrap();
    let values = persist::load_record_values(dir.path()).await.unwrap();
    let summary = aggregate(&DEFAULT_DIMENSIONS, values_refs(&values)).unwrap();
    assert!(summary.is_empty());

    let out = dir.path().join("aggregated_results.json");
    persist::write_summary(&out, &summary).await.unwrap();
    assert_eq!(tokio::fs::read_to_string(&out).await.unwrap().trim(), "{}");
}

#[tokio::test]
async fn malformed_file_names_its_path() {
    let dir = tempdir().unwrap();
    tokio::fs::write(
        dir.path().join("broken.json"),
        json!({ "test_type": "RAGAS", "model_name": "m", "total_questions": 5, "dspy_score": 1 }).to_string(),
    )
    .await
    .unwrap();

    let values = persist::load_record_values(dir.path()).await.unwrap();
    match aggregate(&DEFAULT_DIMENSIONS, values_refs(&values)) {
        Err(Error::MalformedRecord { source_id, field }) => {
            assert!(source_id.ends_with("broken.json"));
            assert_eq!(field, "model_provider");
        }
        other => panic!("expected a malformed record error, got {other:?}"),
    }
}

#[tokio::test]
async fn store_records_aggregate_like_files() {
    let dir = tempdir().unwrap();
    let store = structeval_store::Store::open(dir.path().join("experiments.db")).unwrap();
    let run_id = store.create_run(None).unwrap();

    let client = from_async_fn(|prompt, _| async move {
        if prompt.contains("Nile") {
            return Ok("{}".to_string());
        }
        Ok(r#"{"answerable_question": false}"#.to_string())
    });
    let dataset = dir.path().join("wiki.json");
    tokio::fs::write(&dataset, DATASET).await.unwrap();
    let records = Experiment::builder()
        .task(ASSESS_ANSWERABILITY)
        .data_source(Arc::new(JsonDataSource::new(&dataset)))
        .client(client)
        .model("claude-3-haiku", "anthropic")
        .build()
        .unwrap()
        .run_all(&PromptingMethod::ALL, &[false])
        .await
        .unwrap();
    for record in &records {
        store.save_experiment(run_id, record).unwrap();
    }

    let values = store.experiment_values().unwrap();
    let dims = [Dimension::ModelName, Dimension::PromptingMethod];
    let summary = aggregate(&dims, values_refs(&values)).unwrap();
    let dspy = summary.get(&["claude-3-haiku", "dspy"]).unwrap();
    assert_eq!(dspy.dspy_total, 3.0);
    assert_eq!(dspy.average_success_rate, 0.75);
    // Mars and the empty box are unanswerable
    assert_eq!(dspy.average_task_performance, 0.5);
}
