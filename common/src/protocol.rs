//! Messages exchanged between the service and the host page.
//!
use serde::{Deserialize, Serialize};

use crate::labels::{LABELS, NUM_CLASSES};

/// What the page shows as result: label text and the chart series.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ResultView {
    pub label: String,
    pub categories: Vec<String>,
    pub probabilities: Vec<f32>,
}

impl ResultView {
    pub fn new(label: String, probabilities: [f32; NUM_CLASSES]) -> Self {
        Self {
            label,
            categories: LABELS.iter().map(|label| label.to_string()).collect(),
            probabilities: probabilities.to_vec(),
        }
    }
}

/// Where a gallery entry came from.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntrySource {
    Upload { file_name: Option<String> },
    Snapshot,
}

/// Gallery entry as listed to the page.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GalleryEntryView {
    pub id: u64,
    pub source: EntrySource,
    pub width: u32,
    pub height: u32,
    pub mime: String,
}

/// A file of an upload that could not be decoded.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RejectedFile {
    pub file_name: Option<String>,
    pub reason: String,
}

/// Outcome of one upload request.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct UploadReport {
    /// Ids of the new gallery entries in insertion order.
    pub added: Vec<u64>,
    pub rejected: Vec<RejectedFile>,
}

/// Metadata of an active camera stream.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StreamInfo {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// Lifecycle of the classification model.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Loading,
    Ready,
    Failed,
}

/// Service status.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StatusView {
    pub model: ModelStatus,
    pub camera: Option<StreamInfo>,
    pub gallery_size: usize,
    pub predictions: u64,
    pub tensors_created: u64,
    pub tensors_released: u64,
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn result_view_carries_schema_categories() {
        let view = ResultView::new("Plant Condition: Soil".into(), [1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(view.categories, LABELS);
        assert_eq!(view.probabilities.len(), NUM_CLASSES);
    }

    #[test]
    fn entry_source_is_tagged() -> serde_json::Result<()> {
        let upload = EntrySource::Upload {
            file_name: Some("leaf.jpg".into()),
        };
        let json = serde_json::to_value(&upload)?;
        assert_eq!(json["kind"], "upload");
        assert_eq!(json["file_name"], "leaf.jpg");

        let snapshot = serde_json::to_value(EntrySource::Snapshot)?;
        assert_eq!(snapshot["kind"], "snapshot");

        Ok(())
    }

    #[test]
    fn model_status_is_lowercase() -> serde_json::Result<()> {
        assert_eq!(serde_json::to_string(&ModelStatus::Failed)?, "\"failed\"");
        Ok(())
    }
}
