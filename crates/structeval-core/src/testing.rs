use anyhow::Result;
use structeval_types::ExperimentRecord;

/// Helper to assert an experiment's success rate meets a threshold.
///
/// Use this in your `#[tokio::test]` functions.
///
/// # Example
/// ```ignore
/// #[tokio::test]
/// async fn rate_context_stays_valid() -> Result<()> {
///     let experiment = Experiment::builder()
///         .task("RateContext")
///         .data_source(data)
///         .client(client)
///         .model("llama3.2:3b", "ollama")
///         .build()?;
///
///     let record = experiment.run(PromptingMethod::Fstring, false).await?;
///
///     // Assert 80% of responses are valid
///     assert_success_rate(&record, 0.8)?;
///
///     Ok(())
/// }
/// ```
pub fn assert_success_rate(record: &ExperimentRecord, min_success_rate: f64) -> Result<()> {
    if record.success_rate < min_success_rate {
        anyhow::bail!(
            "{}: success rate {:.1}% is below threshold {:.1}%\n{}",
            record.test_name,
            record.success_rate * 100.0,
            min_success_rate * 100.0,
            ExperimentRecord::summary_table(std::slice::from_ref(record))
        );
    }
    Ok(())
}

/// Helper to assert average task performance meets a threshold.
pub fn assert_avg_task_performance(record: &ExperimentRecord, min_avg: f64) -> Result<()> {
    if record.average_task_performance < min_avg {
        anyhow::bail!(
            "{}: avg task performance {:.3} is below threshold {:.3}\n{}",
            record.test_name,
            record.average_task_performance,
            min_avg,
            ExperimentRecord::summary_table(std::slice::from_ref(record))
        );
    }
    Ok(())
}

/// Helper to assert every response was structurally valid.
pub fn assert_all_valid(record: &ExperimentRecord) -> Result<()> {
    if record.num_successes != record.num_attempts {
        let first = record
            .failed_responses
            .first()
            .map(|r| r.response.as_str())
            .unwrap_or_default();
        anyhow::bail!(
            "{}: {}/{} responses valid, first failure: {}",
            record.test_name,
            record.num_successes,
            record.num_attempts,
            first
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use structeval_types::{PromptingMethod, SingleTrialResult};

    #[test]
    fn thresholds() {
        let mut record = ExperimentRecord::new("AssessAnswerability", "m", "p", PromptingMethod::Dspy);
        record.record(SingleTrialResult::new("p1", "{}", true, 1.0));
        record.record(SingleTrialResult::new("p2", "nope", false, 0.0));
        record.finalize();

        assert!(assert_success_rate(&record, 0.5).is_ok());
        assert!(assert_success_rate(&record, 0.6).is_err());
        assert!(assert_avg_task_performance(&record, 0.5).is_ok());
        let err = assert_all_valid(&record).unwrap_err();
        assert!(err.to_string().contains("first failure: nope"));
    }
}
