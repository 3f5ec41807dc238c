//! Dataset split loading (local files or the hub) into JSON rows.

use crate::args::DatasetSpec;
use crate::error::{TrainingError, TrainingResult};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sftkit_hub::{DataFormat, HubClient, select_split_files};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Stable identifier for a formatted dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// Where a dataset comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    /// A single data file, used as the train split.
    LocalFile(PathBuf),
    /// A directory searched for split files.
    LocalDir(PathBuf),
    /// A hub dataset id.
    Hub(String),
}

impl DatasetSource {
    #[must_use]
    pub fn resolve(dataset_name: &str) -> Self {
        let path = Path::new(dataset_name);
        if path.is_file() {
            Self::LocalFile(path.to_path_buf())
        } else if path.is_dir() {
            Self::LocalDir(path.to_path_buf())
        } else {
            Self::Hub(dataset_name.to_string())
        }
    }
}

/// Raw rows of one split.
#[derive(Debug, Clone)]
pub struct RawSplit {
    pub split: String,
    pub files: Vec<PathBuf>,
    pub rows: Vec<Value>,
}

/// Load `split` of the dataset named in `spec`.
pub async fn load_split(spec: &DatasetSpec, split: &str, hub: &HubClient) -> TrainingResult<RawSplit> {
    let files = match DatasetSource::resolve(&spec.dataset_name) {
        DatasetSource::LocalFile(path) => {
            if split != spec.dataset_train_split {
                return Err(TrainingError::Dataset(format!(
                    "{} is a single file and only provides the '{}' split, not '{split}'",
                    path.display(),
                    spec.dataset_train_split
                )));
            }
            vec![path]
        }
        DatasetSource::LocalDir(dir) => local_split_files(&dir, spec.dataset_config.as_deref(), split)?,
        DatasetSource::Hub(id) => hub.fetch_dataset_split(&id, spec.dataset_config.as_deref(), split).await?,
    };

    let mut rows = Vec::new();
    for file in &files {
        let mut chunk = read_rows(file)?;
        debug!(file = %file.display(), rows = chunk.len(), "read data file");
        rows.append(&mut chunk);
    }

    if rows.is_empty() {
        return Err(TrainingError::Dataset(format!("split '{split}' of '{}' has no rows", spec.dataset_name)));
    }

    info!(dataset = %spec.dataset_name, split, files = files.len(), rows = rows.len(), "loaded dataset split");
    Ok(RawSplit { split: split.to_string(), files, rows })
}

fn local_split_files(dir: &Path, config: Option<&str>, split: &str) -> TrainingResult<Vec<PathBuf>> {
    let mut listing = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| TrainingError::Dataset(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| TrainingError::Dataset(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        listing.push(rel);
    }

    let selected = select_split_files(&listing, config, split);
    if selected.is_empty() {
        return Err(TrainingError::Dataset(format!(
            "no data files for split '{split}' in {}",
            dir.display()
        )));
    }
    Ok(selected.iter().map(|rel| dir.join(rel)).collect())
}

/// Read every row of a `.jsonl`, `.json` or `.parquet` file as JSON.
pub fn read_rows(path: &Path) -> TrainingResult<Vec<Value>> {
    let name = path.to_string_lossy();
    match DataFormat::from_path(&name) {
        Some(DataFormat::JsonLines) => read_jsonl(path),
        Some(DataFormat::Json) => read_json(path),
        Some(DataFormat::Parquet) => read_parquet(path),
        None => Err(TrainingError::Dataset(format!("unsupported data file: {}", path.display()))),
    }
}

fn read_jsonl(path: &Path) -> TrainingResult<Vec<Value>> {
    let contents = std::fs::read_to_string(path)?;
    let mut rows = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: Value = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!("failed to parse {} line {}: {}", path.display(), idx + 1, e))
        })?;
        rows.push(row);
    }

    Ok(rows)
}

fn read_json(path: &Path) -> TrainingResult<Vec<Value>> {
    let value: Value = serde_json::from_slice(&std::fs::read(path)?)
        .map_err(|e| TrainingError::Dataset(format!("failed to parse {}: {e}", path.display())))?;

    match value {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(rows)) => Ok(rows),
            _ => Err(TrainingError::Dataset(format!(
                "{} must hold an array of rows or an object with a \"data\" array",
                path.display()
            ))),
        },
        _ => Err(TrainingError::Dataset(format!("{} does not hold rows", path.display()))),
    }
}

fn read_parquet(path: &Path) -> TrainingResult<Vec<Value>> {
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut writer = arrow::json::ArrayWriter::new(Vec::new());
    for batch in reader {
        let batch = batch?;
        writer.write(&batch)?;
    }
    writer.finish()?;

    let bytes = writer.into_inner();
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write `texts` as JSON lines of `{ "<field>": text }`.
pub fn write_text_jsonl(path: &Path, field: &str, texts: &[String]) -> TrainingResult<()> {
    let mut out = String::new();
    for text in texts {
        let mut row = serde_json::Map::new();
        row.insert(field.to_string(), Value::String(text.clone()));
        out.push_str(&serde_json::to_string(&row)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

pub fn compute_dataset_id(texts: &[String]) -> DatasetId {
    let mut hasher = Sha256::new();
    for text in texts {
        hasher.update(text.as_bytes());
        hasher.update(b"\n");
    }
    DatasetId(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::json::ReaderBuilder;
    use arrow::json::reader::infer_json_schema_from_seekable;
    use parquet::arrow::ArrowWriter;
    use std::io::Cursor;
    use std::sync::Arc;
    use tempfile::TempDir;

    const ROWS: &str = concat!(
        r#"{"chosen": [{"content": "Hi", "role": "user"}, {"content": "Hello!", "role": "assistant"}]}"#,
        "\n",
        r#"{"chosen": [{"content": "2+2?", "role": "user"}, {"content": "4", "role": "assistant"}]}"#,
        "\n"
    );

    fn write_parquet(path: &Path, jsonl: &str) {
        let mut cursor = Cursor::new(jsonl.as_bytes());
        let (schema, _) = infer_json_schema_from_seekable(&mut cursor, None).unwrap();
        let schema = Arc::new(schema);
        let reader = ReaderBuilder::new(schema.clone()).build(cursor).unwrap();

        let file = std::fs::File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        for batch in reader {
            writer.write(&batch.unwrap()).unwrap();
        }
        writer.close().unwrap();
    }

    fn spec(name: &Path) -> DatasetSpec {
        DatasetSpec { dataset_name: name.display().to_string(), ..Default::default() }
    }

    fn offline_hub() -> HubClient {
        HubClient::new("http://127.0.0.1:9", None).unwrap()
    }

    #[test]
    fn test_read_jsonl_reports_line_numbers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train.jsonl");
        std::fs::write(&path, "{\"a\": 1}\n\nnot json\n").unwrap();
        let err = read_rows(&path).unwrap_err().to_string();
        assert!(err.contains("line 3"), "{err}");
    }

    #[test]
    fn test_parquet_and_jsonl_load_the_same_rows() {
        let temp = TempDir::new().unwrap();
        let jsonl = temp.path().join("train.jsonl");
        let parquet = temp.path().join("train.parquet");
        std::fs::write(&jsonl, ROWS).unwrap();
        write_parquet(&parquet, ROWS);

        let from_jsonl = read_rows(&jsonl).unwrap();
        let from_parquet = read_rows(&parquet).unwrap();
        assert_eq!(from_parquet.len(), 2);
        for (a, b) in from_jsonl.iter().zip(&from_parquet) {
            assert_eq!(a["chosen"][0]["content"], b["chosen"][0]["content"]);
            assert_eq!(a["chosen"][1]["content"], b["chosen"][1]["content"]);
        }
    }

    #[test]
    fn test_read_json_accepts_array_or_data_object() {
        let temp = TempDir::new().unwrap();
        let array = temp.path().join("a.json");
        let object = temp.path().join("b.json");
        std::fs::write(&array, r#"[{"x": 1}, {"x": 2}]"#).unwrap();
        std::fs::write(&object, r#"{"data": [{"x": 1}]}"#).unwrap();
        assert_eq!(read_rows(&array).unwrap().len(), 2);
        assert_eq!(read_rows(&object).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_directory_split_selection() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("data")).unwrap();
        std::fs::write(temp.path().join("data/train-00000-of-00001.jsonl"), ROWS).unwrap();
        std::fs::write(temp.path().join("data/test-00000-of-00001.jsonl"), ROWS.lines().next().unwrap()).unwrap();

        let hub = offline_hub();
        let train = load_split(&spec(temp.path()), "train", &hub).await.unwrap();
        let test = load_split(&spec(temp.path()), "test", &hub).await.unwrap();
        assert_eq!(train.rows.len(), 2);
        assert_eq!(test.rows.len(), 1);
        assert!(load_split(&spec(temp.path()), "validation", &hub).await.is_err());
    }

    #[tokio::test]
    async fn test_single_file_only_serves_train_split() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("prefs.jsonl");
        std::fs::write(&path, ROWS).unwrap();

        let hub = offline_hub();
        assert_eq!(load_split(&spec(&path), "train", &hub).await.unwrap().rows.len(), 2);
        assert!(load_split(&spec(&path), "test", &hub).await.is_err());
    }

    #[test]
    fn test_write_text_jsonl_and_dataset_id() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train.jsonl");
        let texts = vec!["a".to_string(), "b".to_string()];
        write_text_jsonl(&path, "text", &texts).unwrap();

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows[1]["text"], "b");
        assert_eq!(compute_dataset_id(&texts), compute_dataset_id(&texts));
        assert_ne!(compute_dataset_id(&texts), compute_dataset_id(&texts[..1]));
    }
}
