//! Application context shared by all endpoints.
//!
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Result};
use common::protocol::{ModelStatus, ResultView, StatusView, StreamInfo, UploadReport};

use crate::{
    config::ServerConfig,
    error::AppError,
    gallery::{Gallery, NewEntry},
    meter::Meter,
    nn::{load_model, InferModel},
    pipeline::{predict, Prediction},
    presenter::ResultPresenter,
    sensors::{CameraProvider, V4lCameraProvider},
    upload::{add_uploads, UploadFile},
    webcam::{FrameReceiver, Webcam},
};

enum ModelState {
    Loading,
    Ready(Arc<dyn InferModel>),
    Failed,
}

/// State of the application: the model, the gallery, the current result and
/// the camera.
///
/// Each action is its own error boundary: failures are logged, written to
/// the result label, and returned to the caller.
pub struct AppContext {
    model: RwLock<ModelState>,
    gallery: Gallery,
    presenter: Mutex<ResultPresenter>,
    webcam: Webcam,
    meter: Arc<Meter>,
}

impl AppContext {
    pub fn new(camera_provider: Arc<dyn CameraProvider>) -> Self {
        Self {
            model: RwLock::new(ModelState::Loading),
            gallery: Gallery::new(),
            presenter: Mutex::new(ResultPresenter::new()),
            webcam: Webcam::new(camera_provider),
            meter: Arc::new(Meter::new()),
        }
    }

    /// Context using the Video4Linux cameras named in the configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        let provider = V4lCameraProvider::new(
            config.camera_devices(),
            &config.camera_format,
            config.resolution,
        );
        Self::new(Arc::new(provider))
    }

    /// Load the model named in the configuration. Returns whether it loaded.
    pub async fn load_model(&self, config: &ServerConfig) -> bool {
        self.install_model(load_model(config).await)
    }

    /// Take the outcome of a model load. Only the first outcome counts.
    pub fn install_model(&self, loaded: Result<Arc<dyn InferModel>>) -> bool {
        let err = {
            let mut model = self.model.write().unwrap();
            if !matches!(*model, ModelState::Loading) {
                log::warn!("Ignoring repeated model load");
                return matches!(*model, ModelState::Ready(_));
            }

            match loaded {
                Ok(loaded) => {
                    *model = ModelState::Ready(loaded);
                    log::info!("Model loaded");
                    return true;
                }
                Err(err) => {
                    *model = ModelState::Failed;
                    err
                }
            }
        };

        self.fail(AppError::ModelLoad(err));
        false
    }

    pub fn model_status(&self) -> ModelStatus {
        match *self.model.read().unwrap() {
            ModelState::Loading => ModelStatus::Loading,
            ModelState::Ready(_) => ModelStatus::Ready,
            ModelState::Failed => ModelStatus::Failed,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn meter(&self) -> &Arc<Meter> {
        &self.meter
    }

    pub async fn upload(&self, files: Vec<UploadFile>) -> UploadReport {
        add_uploads(&self.gallery, files).await
    }

    pub async fn start_webcam(&self) -> Result<StreamInfo, AppError> {
        self.webcam
            .start()
            .await
            .map_err(|err| self.fail(AppError::Camera(err)))
    }

    pub async fn stop_webcam(&self) -> bool {
        self.webcam.stop().await
    }

    /// Snap the current camera frame into the gallery and return its id.
    pub async fn snap(&self) -> Result<u64, AppError> {
        let image = self
            .webcam
            .snap()
            .await
            .map_err(|err| self.fail(AppError::Camera(err)))?;
        let new_entry = NewEntry::snapshot(image).map_err(|err| self.fail(AppError::Camera(err)))?;

        let id = self.gallery.insert(new_entry);
        log::info!("Snapshot added as gallery entry {}", id);
        Ok(id)
    }

    pub async fn camera_frames(&self) -> Option<FrameReceiver> {
        self.webcam.frames().await
    }

    /// Predict the growth stage of a gallery entry and show the result.
    pub async fn predict_entry(&self, id: u64) -> Result<Prediction, AppError> {
        let entry = self
            .gallery
            .get(id)
            .ok_or_else(|| self.fail(AppError::UnknownEntry(id)))?;

        let model = match &*self.model.read().unwrap() {
            ModelState::Ready(model) => Some(Arc::clone(model)),
            _ => None,
        };
        let model = model.ok_or_else(|| self.fail(AppError::NoModel))?;

        let meter = Arc::clone(&self.meter);
        let image = Arc::clone(&entry.image);
        let task = tokio::task::spawn_blocking(move || predict(model.as_ref(), &image, &meter));
        let prediction = task
            .await
            .map_err(|err| anyhow!("prediction task failed: {err}"))
            .and_then(|result| result)
            .map_err(|err| self.fail(AppError::Prediction(err)))?;

        log::info!(
            "Entry {} predicted as {} ({:.3})",
            id,
            prediction.label(),
            prediction.confidence()
        );
        self.presenter.lock().unwrap().show_prediction(&prediction);

        Ok(prediction)
    }

    pub fn result_view(&self) -> ResultView {
        self.presenter.lock().unwrap().view()
    }

    pub fn chart_svg(&self) -> String {
        self.presenter.lock().unwrap().render_chart()
    }

    pub async fn status(&self) -> StatusView {
        StatusView {
            model: self.model_status(),
            camera: self.webcam.info().await,
            gallery_size: self.gallery.len(),
            predictions: self.meter.predictions(),
            tensors_created: self.meter.tensors_created(),
            tensors_released: self.meter.tensors_released(),
        }
    }

    /// Log a failed action and show it on the result label.
    fn fail(&self, err: AppError) -> AppError {
        log::error!("{}", err);
        self.presenter.lock().unwrap().show_error(&err);
        err
    }
}
