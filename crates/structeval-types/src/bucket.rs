use serde::{Deserialize, Serialize};

/// Per-record contribution to an [`AggregateBucket`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunScores {
	pub dspy_score: f64,
	pub fstring_score: f64,
	pub questions: f64,
	/// The run's per-attempt mean, not its total.
	pub task_performance: f64,
	pub success_rate: f64,
	pub successes: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketStatus {
	Ok,
	#[default]
	NotApplicable,
}

/// Running totals for one grouping key, then their means once finalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateBucket {
	pub dspy_total: f64,
	pub fstring_total: f64,
	pub total_questions: f64,
	pub runs: u64,
	/// Sum of the per-run task-performance means.
	pub task_performance_total: f64,
	pub success_rate_total: f64,
	/// Runs that produced at least one structurally valid response.
	pub successful_runs: u64,
	pub dspy_average: f64,
	pub fstring_average: f64,
	pub average_questions: f64,
	pub average_task_performance: f64,
	pub average_success_rate: f64,
	pub status: BucketStatus,
}

impl AggregateBucket {
	pub fn add_run(&mut self, scores: &RunScores) {
		self.dspy_total += scores.dspy_score;
		self.fstring_total += scores.fstring_score;
		self.total_questions += scores.questions;
		self.task_performance_total += scores.task_performance;
		self.success_rate_total += scores.success_rate;
		if scores.successes > 0.0 {
			self.successful_runs += 1;
		}
		self.runs += 1;
	}

	/// Computes the means. A bucket with no runs keeps zeros and is marked
	/// `not_applicable`.
	pub fn finalize(&mut self) {
		if self.runs == 0 {
			self.dspy_average = 0.0;
			self.fstring_average = 0.0;
			self.average_questions = 0.0;
			self.average_task_performance = 0.0;
			self.average_success_rate = 0.0;
			self.status = BucketStatus::NotApplicable;
			return;
		}
		let runs = self.runs as f64;
		self.dspy_average = self.dspy_total / runs;
		self.fstring_average = self.fstring_total / runs;
		self.average_questions = self.total_questions / runs;
		self.average_task_performance = self.task_performance_total / runs;
		self.average_success_rate = self.success_rate_total / runs;
		self.status = BucketStatus::Ok;
	}

	/// Average score as a fraction of average questions, 0 when there are none.
	pub fn dspy_fraction(&self) -> f64 {
		fraction(self.dspy_average, self.average_questions)
	}

	pub fn fstring_fraction(&self) -> f64 {
		fraction(self.fstring_average, self.average_questions)
	}
}

fn fraction(score: f64, questions: f64) -> f64 {
	if questions <= 0.0 { 0.0 } else { score / questions }
}
