//! Failures of user actions.
//!
//! Every action boundary turns one of these into a log entry and a short
//! message on the result label. None of them is fatal to the service.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load model: {0:#}")]
    ModelLoad(anyhow::Error),

    #[error("failed to access camera: {0:#}")]
    Camera(anyhow::Error),

    #[error("no model loaded")]
    NoModel,

    #[error("prediction failed: {0:#}")]
    Prediction(anyhow::Error),

    #[error("gallery entry {0} not found")]
    UnknownEntry(u64),
}

impl AppError {
    /// Short, human readable message for the result label.
    pub fn user_message(&self) -> String {
        match self {
            AppError::ModelLoad(_) => {
                "Error loading model. Check the server log for details.".into()
            }
            AppError::Camera(_) => {
                "Error accessing webcam. Check the server log for details.".into()
            }
            AppError::NoModel => "Error during prediction: no model loaded.".into(),
            AppError::Prediction(_) => {
                "Error during prediction. Check the server log for details.".into()
            }
            AppError::UnknownEntry(id) => format!("Image {id} is not in the gallery."),
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn messages_hide_details() {
        let err = AppError::Prediction(anyhow::anyhow!("shape mismatch [1, 3]"));
        assert!(err.to_string().contains("shape mismatch"));
        assert!(!err.user_message().contains("shape mismatch"));
    }

    #[test]
    fn no_model_is_named() {
        assert!(AppError::NoModel.user_message().contains("no model loaded"));
    }
}
