//! JSON output writer.
//!
//! Writes trace views and capture records to JSON files with proper
//! formatting, and reads them back.

use super::schema::TraceView;
use crate::rollup::CaptureRecord;
use crate::utils::error::OutputError;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::path::Path;

/// Write a trace view to a JSON file
///
/// **Public** - main entry point for JSON output
///
/// # Arguments
/// * `view` - Trace view to write
/// * `output_path` - Path to output JSON file
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::SerializationFailed` - JSON serialization error
/// * `OutputError::InvalidPath` - Path cannot be created or is invalid
///
/// # Example
/// ```ignore
/// let view = TraceView::from_trace(&trace);
/// write_trace_view(&view, "trace.json")?;
/// ```
pub fn write_trace_view(view: &TraceView, output_path: impl AsRef<Path>) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();
    info!("Writing trace {} to: {}", view.id, output_path.display());
    write_json(view, output_path)
}

/// Read a trace view from a JSON file
///
/// **Public** - used by the flamegraph command and tests
///
/// # Errors
/// * `OutputError::WriteFailed` - File read error (reusing WriteFailed for I/O)
/// * `OutputError::SerializationFailed` - JSON parse error
pub fn read_trace_view(input_path: impl AsRef<Path>) -> Result<TraceView, OutputError> {
    let view: TraceView = read_json(input_path.as_ref())?;
    debug!("Trace view loaded: version {}, trace {}", view.version, view.id);
    Ok(view)
}

/// Serialize a trace view to a pretty JSON string
pub fn trace_view_to_string(view: &TraceView) -> Result<String, OutputError> {
    serde_json::to_string_pretty(view).map_err(OutputError::SerializationFailed)
}

/// Write capture records as a JSON array
pub fn write_records(records: &[CaptureRecord], output_path: impl AsRef<Path>) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();
    info!("Writing {} record(s) to: {}", records.len(), output_path.display());
    write_json(&records, output_path)
}

/// Read capture records from a JSON array
pub fn read_records(input_path: impl AsRef<Path>) -> Result<Vec<CaptureRecord>, OutputError> {
    let records: Vec<CaptureRecord> = read_json(input_path.as_ref())?;
    debug!("Loaded {} record(s)", records.len());
    Ok(records)
}

fn write_json<T: Serialize + ?Sized>(value: &T, output_path: &Path) -> Result<(), OutputError> {
    let writer = create_output(output_path)?;
    serde_json::to_writer_pretty(writer, value).map_err(OutputError::SerializationFailed)?;

    info!("Written successfully ({} bytes)", calculate_file_size(output_path));
    Ok(())
}

/// Open `output_path` for writing, creating missing parent directories
///
/// **Crate** - shared by the JSON and SVG writers
pub(crate) fn create_output(output_path: &Path) -> Result<BufWriter<File>, OutputError> {
    validate_output_path(output_path)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!("Creating parent directories: {}", parent.display());
            std::fs::create_dir_all(parent).map_err(|e| {
                OutputError::InvalidPath(format!("Cannot create directory {}: {}", parent.display(), e))
            })?;
        }
    }

    let file = File::create(output_path).map_err(OutputError::WriteFailed)?;
    Ok(BufWriter::new(file))
}

fn read_json<T: DeserializeOwned>(input_path: &Path) -> Result<T, OutputError> {
    debug!("Reading JSON from: {}", input_path.display());
    let file = File::open(input_path).map_err(OutputError::WriteFailed)?;
    serde_json::from_reader(BufReader::new(file)).map_err(OutputError::SerializationFailed)
}

/// Validate that output path is writable
///
pub fn validate_output_path(path: &Path) -> Result<(), OutputError> {
    if path.as_os_str().is_empty() {
        return Err(OutputError::InvalidPath("Path is empty".to_string()));
    }

    // Check if we're trying to overwrite a directory
    if path.exists() && path.is_dir() {
        return Err(OutputError::InvalidPath(format!(
            "Path is a directory: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Calculate file size in bytes
///
/// **Private** - internal utility
fn calculate_file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
