//! Storage helpers for the local file store: YAML documents, Parquet metric
//! history, directory management.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::error::{Result, RunlogError};
use crate::models::Metric;

// ─── Directory helpers ────────────────────────────────────────────────────────

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Names of the immediate subdirectories of `path`, sorted. Missing path
/// yields an empty list.
pub fn list_dirs(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let mut names = vec![];
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

// ─── YAML I/O ─────────────────────────────────────────────────────────────────

pub fn save_yaml<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let content = serde_yaml::to_string(data)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn load_yaml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Like [`load_yaml`] but a missing file is an error.
pub fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

// ─── Parquet metric history ──────────────────────────────────────────────────

fn metrics_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
        Field::new("step", DataType::Int64, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
    ]))
}

/// Append metric rows to a Parquet file.
/// Strategy: read existing, concat, write back. Histories are small and
/// writes are per logging call.
pub fn append_metrics(path: &Path, rows: &[Metric]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let new_batch = metrics_to_record_batch(rows)?;

    let final_batch = if path.exists() {
        let existing = read_parquet(path)?;
        arrow::compute::concat_batches(&metrics_schema(), &[existing, new_batch])?
    } else {
        new_batch
    };

    write_parquet(path, &final_batch)
}

/// Full metric history stored at `path`, in logging order.
pub fn read_metrics(path: &Path) -> Result<Vec<Metric>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let batch = read_parquet(path)?;
    record_batch_to_metrics(&batch)
}

fn read_parquet(path: &Path) -> Result<RecordBatch> {
    let file = fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut batches = vec![];
    for batch in reader {
        batches.push(batch?);
    }
    let schema = metrics_schema();
    match batches.len() {
        0 => Ok(RecordBatch::new_empty(schema)),
        1 => Ok(batches.remove(0)),
        _ => Ok(arrow::compute::concat_batches(&schema, &batches)?),
    }
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = fs::File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn metrics_to_record_batch(rows: &[Metric]) -> Result<RecordBatch> {
    let keys: Vec<&str> = rows.iter().map(|m| m.key.as_str()).collect();
    let values: Vec<f64> = rows.iter().map(|m| m.value).collect();
    let steps: Vec<i64> = rows.iter().map(|m| m.step).collect();
    let timestamps: Vec<i64> = rows.iter().map(|m| m.timestamp).collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(keys)),
        Arc::new(Float64Array::from(values)),
        Arc::new(Int64Array::from(steps)),
        Arc::new(
            TimestampMillisecondArray::from(timestamps)
                .with_timezone_opt(Some("UTC".to_string())),
        ),
    ];
    Ok(RecordBatch::try_new(metrics_schema(), columns)?)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<T>())
        .ok_or_else(|| RunlogError::Other(format!("metrics file has no usable '{name}' column")))
}

fn record_batch_to_metrics(batch: &RecordBatch) -> Result<Vec<Metric>> {
    let keys = column::<StringArray>(batch, "key")?;
    let values = column::<Float64Array>(batch, "value")?;
    let steps = column::<Int64Array>(batch, "step")?;
    let timestamps = column::<TimestampMillisecondArray>(batch, "timestamp")?;

    Ok((0..batch.num_rows())
        .map(|i| Metric {
            key: keys.value(i).to_string(),
            value: values.value(i),
            step: steps.value(i),
            timestamp: timestamps.value(i),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn metrics_append_across_calls() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("metrics.parquet");

        append_metrics(&path, &[Metric::new("loss", 0.9, 0)]).unwrap();
        append_metrics(
            &path,
            &[Metric::new("loss", 0.4, 1), Metric::new("acc", 0.8, 1)],
        )
        .unwrap();

        let rows = read_metrics(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].key, "loss");
        assert_eq!(rows[0].value, 0.9);
        assert_eq!(rows[2].key, "acc");
        assert_eq!(rows[2].step, 1);
    }

    #[test]
    fn missing_files_read_as_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(read_metrics(&tmp.path().join("nope.parquet")).unwrap().is_empty());
        let params: BTreeMap<String, String> = load_yaml(&tmp.path().join("nope.yaml")).unwrap();
        assert!(params.is_empty());
        assert!(list_dirs(&tmp.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn list_dirs_skips_files() {
        let tmp = TempDir::new().unwrap();
        ensure_dir(&tmp.path().join("b")).unwrap();
        ensure_dir(&tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("meta.yaml"), "x: 1").unwrap();
        assert_eq!(list_dirs(tmp.path()).unwrap(), vec!["a", "b"]);
    }
}
