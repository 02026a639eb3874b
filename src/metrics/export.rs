//! JSON/CSV export of the metrics history.
//!
//! Export never aborts halfway: values that JSON cannot represent are replaced
//! by summaries or strings, and when encoding fails outright an error-stub
//! document is written in place of the export.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::MetricsError;
use crate::math::{VectorMath, scalar::ScalarMath};
use crate::stats::now_secs;

use super::{MetricsResult, QueryMetricsCollector, QueryMetricsRecord};

/// Elements kept at each end of a summarized array.
const SUMMARY_EDGE: usize = 3;

/// JSON for a float, with non-finite values rendered as strings.
pub fn sanitize_f64(value: f64) -> Value {
    if value.is_nan() {
        Value::String("NaN".into())
    } else if value.is_infinite() {
        Value::String(if value > 0.0 { "Infinity" } else { "-Infinity" }.into())
    } else {
        serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

/// Compact summary of a numeric array.
pub fn summarize_array(values: &[f64]) -> Value {
    let math = ScalarMath;
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (min, max) = math.min_max(&finite);
    let edge = SUMMARY_EDGE.min(values.len());
    json!({
        "type": "array_summary",
        "len": values.len(),
        "mean": sanitize_f64(math.mean(&finite)),
        "min": sanitize_f64(min),
        "max": sanitize_f64(max),
        "first": values[..edge].iter().map(|&v| sanitize_f64(v)).collect::<Vec<_>>(),
        "last": values[values.len() - edge..].iter().map(|&v| sanitize_f64(v)).collect::<Vec<_>>(),
    })
}

/// Placeholder for a raw byte payload.
fn summarize_bytes(len: usize) -> Value {
    json!({ "type": "bytes", "len": len })
}

/// Numeric arrays longer than `threshold` become summaries, recursively.
///
/// Byte payloads serialize as arrays of integers in `0..=255`; those are
/// reduced to their length.
pub fn sanitize_value(value: &Value, threshold: usize) -> Value {
    match value {
        Value::Array(items) => {
            if items.len() > threshold {
                if items.iter().all(|v| v.as_u64().is_some_and(|b| b <= u64::from(u8::MAX))) {
                    return summarize_bytes(items.len());
                }
                let numeric: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
                if let Some(numbers) = numeric {
                    return summarize_array(&numbers);
                }
            }
            Value::Array(items.iter().map(|v| sanitize_value(v, threshold)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v, threshold)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

fn record_to_value(record: &QueryMetricsRecord, threshold: usize) -> MetricsResult<Value> {
    let raw = serde_json::to_value(record).map_err(|e| MetricsError::Encode {
        message: e.to_string(),
    })?;
    Ok(sanitize_value(&raw, threshold))
}

fn write_file(path: &Path, content: &str) -> MetricsResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| MetricsError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    std::fs::write(path, content).map_err(|e| MetricsError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

fn error_stub(message: &str, records: usize) -> Value {
    json!({
        "error": message,
        "record_count": records,
        "exported_at": sanitize_f64(now_secs()),
    })
}

/// Single-row CSV document carrying an export error.
fn error_stub_csv(message: &str) -> MetricsResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["error"])
        .and_then(|()| writer.write_record([message]))
        .map_err(|e| MetricsError::Encode {
            message: e.to_string(),
        })?;
    writer.into_inner().map_err(|e| MetricsError::Encode {
        message: e.to_string(),
    })
}

/// File name for one completed query: `<YYYYmmddTHHMMSS>_<query_id>.json`.
pub fn record_file_name(record: &QueryMetricsRecord) -> String {
    let secs = record.start_time.floor() as i64;
    let stamp = chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y%m%dT%H%M%S").to_string())
        .unwrap_or_else(|| "00000000T000000".into());
    let safe_id: String = record
        .query_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{stamp}_{safe_id}.json")
}

/// Persist one completed record into `dir`.
pub fn persist_record(dir: &Path, record: &QueryMetricsRecord, threshold: usize) -> MetricsResult<PathBuf> {
    let path = dir.join(record_file_name(record));
    let value = record_to_value(record, threshold)
        .unwrap_or_else(|e| error_stub(&e.to_string(), 1));
    let content = serde_json::to_string_pretty(&value).map_err(|e| MetricsError::Encode {
        message: e.to_string(),
    })?;
    write_file(&path, &content)?;
    Ok(path)
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    query_id: &'a str,
    start_time: f64,
    end_time: Option<f64>,
    duration: Option<f64>,
    results_count: usize,
    quality_score: f64,
    success: bool,
    error_message: &'a str,
    peak_memory_bytes: u64,
    phase_count: usize,
    slowest_phase: &'a str,
}

impl QueryMetricsCollector {
    fn history_json(&self) -> MetricsResult<String> {
        let records: Vec<Value> = self
            .history
            .iter()
            .map(|r| record_to_value(r, self.array_threshold))
            .collect::<MetricsResult<_>>()?;
        let doc = json!({
            "exported_at": sanitize_f64(now_secs()),
            "record_count": records.len(),
            "records": records,
        });
        serde_json::to_string_pretty(&doc).map_err(|e| MetricsError::Encode {
            message: e.to_string(),
        })
    }

    /// Export the history as one JSON document.
    ///
    /// On encoding failure an error stub is written instead; only I/O failure of
    /// that stub is returned.
    pub fn export_metrics_json(&self, path: &Path) -> MetricsResult<()> {
        match self.history_json() {
            Ok(content) => write_file(path, &content),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "metrics JSON export failed, writing stub");
                let stub = error_stub(&e.to_string(), self.history.len()).to_string();
                write_file(path, &stub)
            }
        }
    }

    fn history_csv(&self) -> MetricsResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in &self.history {
            let slowest = record
                .phases
                .iter()
                .max_by(|a, b| a.1.duration.total_cmp(&b.1.duration))
                .map_or("", |(name, _)| name.as_str());
            writer
                .serialize(CsvRow {
                    query_id: &record.query_id,
                    start_time: record.start_time,
                    end_time: record.end_time,
                    duration: record.duration,
                    results_count: record.results.count,
                    quality_score: record.results.quality_score,
                    success: record.success,
                    error_message: record.error_message.as_deref().unwrap_or(""),
                    peak_memory_bytes: record.resources.peak_memory_bytes,
                    phase_count: record.phases.len(),
                    slowest_phase: slowest,
                })
                .map_err(|e| MetricsError::Encode {
                    message: e.to_string(),
                })?;
        }
        writer.into_inner().map_err(|e| MetricsError::Encode {
            message: e.to_string(),
        })
    }

    /// Export one CSV row per completed query.
    pub fn export_metrics_csv(&self, path: &Path) -> MetricsResult<()> {
        match self.history_csv() {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                write_file(path, &content)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "metrics CSV export failed, writing stub");
                let stub = error_stub_csv(&e.to_string())?;
                write_file(path, &String::from_utf8_lossy(&stub))
            }
        }
    }
}
