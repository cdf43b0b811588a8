//! Track export.
//!
//! Exporters turn a snapshot of the sample log into bytes. An
//! [`ExporterRegistry`] registers the exporters available for the enabled
//! Cargo features:
//! - `storage_csv` → CSV exporter
//!
//! # Examples
//!
//! ```
//! use fishfinder::export::ExporterRegistry;
//!
//! let registry = ExporterRegistry::new();
//! for format in registry.list_formats() {
//!     println!("Available format: {format}");
//! }
//! # #[cfg(feature = "storage_csv")]
//! let exporter = registry.create("csv")?;
//! # Ok::<(), fishfinder::error::ExportError>(())
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::ExportError;
use crate::sample::Sample;

/// Converts samples into a track file.
pub trait TrackExporter: Send + Sync {
    /// File extension without the dot.
    fn extension(&self) -> &str;

    fn export(&self, samples: &[Sample]) -> Result<Vec<u8>, ExportError>;

    /// Export straight to a file.
    fn export_to_path(&self, samples: &[Sample], path: &Path) -> Result<(), ExportError> {
        let bytes = self.export(samples)?;
        fs::write(path, &bytes)?;
        info!(
            path = %path.display(),
            samples = samples.len(),
            bytes = bytes.len(),
            "Exported track"
        );
        Ok(())
    }
}

/// Plain CSV with one row per sample.
///
/// Columns: `timestamp,latitude,longitude,depth_m,bottom_strength_pct`, where
/// `timestamp` is RFC 3339 UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExporter;

impl CsvExporter {
    /// A CSV exporter.
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "storage_csv")]
impl TrackExporter for CsvExporter {
    fn extension(&self) -> &str {
        "csv"
    }

    fn export(&self, samples: &[Sample]) -> Result<Vec<u8>, ExportError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([
            "timestamp",
            "latitude",
            "longitude",
            "depth_m",
            "bottom_strength_pct",
        ])?;
        for sample in samples {
            writer.write_record(&[
                format_timestamp(sample.timestamp_ms),
                sample.latitude.to_string(),
                sample.longitude.to_string(),
                format!("{:.3}", sample.depth_m),
                sample.bottom_strength_pct.to_string(),
            ])?;
        }
        writer
            .into_inner()
            .map_err(|e| ExportError::Io(e.into_error()))
    }
}

#[cfg(not(feature = "storage_csv"))]
impl TrackExporter for CsvExporter {
    fn extension(&self) -> &str {
        "csv"
    }

    fn export(&self, _samples: &[Sample]) -> Result<Vec<u8>, ExportError> {
        Err(ExportError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg_attr(not(feature = "storage_csv"), allow(dead_code))]
fn format_timestamp(timestamp_ms: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(timestamp_ms) {
        Some(ts) => ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        None => timestamp_ms.to_string(),
    }
}

type ExporterFactory = Box<dyn Fn() -> Box<dyn TrackExporter> + Send + Sync>;

/// Registry for exporters, filled according to enabled features.
pub struct ExporterRegistry {
    factories: HashMap<String, ExporterFactory>,
}

impl Default for ExporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterRegistry {
    /// A registry holding every exporter enabled at build time.
    pub fn new() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self {
            factories: HashMap::new(),
        };

        #[cfg(feature = "storage_csv")]
        registry.register("csv", || Box::new(CsvExporter::new()));

        registry
    }

    /// Register `factory` under `name`, replacing any earlier one.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn TrackExporter> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Build the exporter registered as `format`.
    pub fn create(&self, format: &str) -> Result<Box<dyn TrackExporter>, ExportError> {
        match self.factories.get(format) {
            Some(factory) => Ok(factory()),
            None if format == "csv" => Err(ExportError::FeatureNotEnabled("storage_csv".into())),
            None => Err(ExportError::UnknownFormat(format.to_string())),
        }
    }

    /// Registered format names, sorted.
    pub fn list_formats(&self) -> Vec<String> {
        let mut formats: Vec<String> = self.factories.keys().cloned().collect();
        formats.sort();
        formats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp_ms: i64, depth_m: f32) -> Sample {
        Sample {
            timestamp_ms,
            latitude: 47.5,
            longitude: -122.25,
            depth_m,
            bottom_strength_pct: 64,
            ..Sample::default()
        }
    }

    #[test]
    fn test_unknown_format() {
        let registry = ExporterRegistry::new();
        assert!(matches!(
            registry.create("gpx"),
            Err(ExportError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_timestamp(1_500), "1970-01-01T00:00:01.500Z");
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_csv_export() {
        let registry = ExporterRegistry::new();
        assert_eq!(registry.list_formats(), vec!["csv".to_string()]);

        let exporter = registry.create("csv").unwrap();
        assert_eq!(exporter.extension(), "csv");
        let bytes = exporter
            .export(&[sample(0, 3.2), sample(1_000, 3.75)])
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "timestamp,latitude,longitude,depth_m,bottom_strength_pct",
                "1970-01-01T00:00:00.000Z,47.5,-122.25,3.200,64",
                "1970-01-01T00:00:01.000Z,47.5,-122.25,3.750,64",
            ]
        );
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_export_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.csv");
        CsvExporter::new()
            .export_to_path(&[sample(0, 1.0)], &path)
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
