use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use structeval_types::DatasetItem;

use crate::registry::Category;

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self) -> Result<Vec<DatasetItem>>;
}

pub struct VecDataSource {
    items: Vec<DatasetItem>,
}

impl VecDataSource {
    pub fn new(items: Vec<DatasetItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl DataSource for VecDataSource {
    async fn load(&self) -> Result<Vec<DatasetItem>> {
        Ok(self.items.clone())
    }
}

/// A JSON array of items, e.g.
/// `[{"title": ..., "context": ..., "question": ..., "answer": ..., "answerable": true}]`.
pub struct JsonDataSource {
    path: PathBuf,
}

impl JsonDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSource for JsonDataSource {
    async fn load(&self) -> Result<Vec<DatasetItem>> {
        let content = tokio_fs_read_to_string(&self.path).await?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {:?}", self.path))?;
        let entries = value
            .as_array()
            .ok_or_else(|| anyhow!("{:?}: expected a JSON array of items", self.path))?;
        entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| item_from_value(entry).with_context(|| format!("Item {}", idx)))
            .collect()
    }
}

/// One item per line; blank lines are skipped.
pub struct JsonlDataSource {
    path: PathBuf,
}

impl JsonlDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSource for JsonlDataSource {
    async fn load(&self) -> Result<Vec<DatasetItem>> {
        let content = tokio_fs_read_to_string(&self.path).await?;
        let mut items = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line)
                .with_context(|| format!("Invalid JSON on line {}", idx + 1))?;
            items.push(item_from_value(&value).with_context(|| format!("Line {}", idx + 1))?);
        }
        Ok(items)
    }
}

/// Picks the loader from the file extension (`.jsonl` or anything else as a JSON array).
pub fn from_path(path: impl Into<PathBuf>) -> Box<dyn DataSource> {
    let path = path.into();
    match path.extension().and_then(|e| e.to_str()) {
        Some("jsonl") => Box::new(JsonlDataSource::new(path)),
        _ => Box::new(JsonDataSource::new(path)),
    }
}

fn item_from_value(value: &Value) -> Result<DatasetItem> {
    let mut obj = value
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow!("expected object"))?;
    // numeric ids are common in exported datasets
    let id = obj.remove("id").and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let mut item: DatasetItem = serde_json::from_value(Value::Object(obj))?;
    item.id = id;
    Ok(item)
}

#[derive(Deserialize)]
struct CategoryInfo {
    #[serde(default)]
    category_description: String,
}

/// Reads `{"<name>": {"category_description": "..."}}`.
pub async fn load_categories(path: impl Into<PathBuf>) -> Result<Vec<Category>> {
    let path = path.into();
    let content = tokio_fs_read_to_string(&path).await?;
    let map: BTreeMap<String, CategoryInfo> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid categories file {:?}", path))?;
    Ok(map
        .into_iter()
        .map(|(name, info)| Category::new(name, info.category_description))
        .collect())
}

#[cfg(not(feature = "sync-fs"))]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use tokio::fs;
    Ok(fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?)
}

#[cfg(feature = "sync-fs")]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use std::fs;
    use tokio::task;
    let path_clone = path.clone();
    let content = task::spawn_blocking(move || {
        fs::read_to_string(&path_clone).with_context(|| format!("Failed to read {:?}", path_clone))
    })
    .await
    .map_err(|e| anyhow!(e))??;
    Ok(content)
}
