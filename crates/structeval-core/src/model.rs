use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Anything that turns a rendered prompt into raw response text.
///
/// `schema` is set when the run asks for structured decoding; clients that
/// cannot constrain their output ignore it.
#[async_trait]
pub trait ModelClient: Send + Sync {
	async fn complete(&self, prompt: &str, schema: Option<&Value>) -> Result<String>;
}

/// Wrap an async closure as a `ModelClient`.
pub fn from_async_fn<F, Fut>(f: F) -> Arc<dyn ModelClient>
where
	F: Send + Sync + 'static + Fn(String, Option<Value>) -> Fut,
	Fut: Future<Output = Result<String>> + Send + 'static,
{
	struct ClosureClient<F, Fut>
	where
		F: Send + Sync + 'static + Fn(String, Option<Value>) -> Fut,
		Fut: Future<Output = Result<String>> + Send + 'static,
	{
		f: F,
	}

	#[async_trait]
	impl<F, Fut> ModelClient for ClosureClient<F, Fut>
	where
		F: Send + Sync + 'static + Fn(String, Option<Value>) -> Fut,
		Fut: Future<Output = Result<String>> + Send + 'static,
	{
		async fn complete(&self, prompt: &str, schema: Option<&Value>) -> Result<String> {
			(self.f)(prompt.to_string(), schema.cloned()).await
		}
	}

	Arc::new(ClosureClient { f })
}

/// Replies with the same text to every prompt.
pub struct StaticClient {
	response: String,
}

impl StaticClient {
	pub fn new(response: impl Into<String>) -> Self {
		Self { response: response.into() }
	}
}

#[async_trait]
impl ModelClient for StaticClient {
	async fn complete(&self, _prompt: &str, _schema: Option<&Value>) -> Result<String> {
		Ok(self.response.clone())
	}
}
