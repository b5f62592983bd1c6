//! Image to prediction pipeline.
//!
use anyhow::{bail, ensure, Result};
use common::labels::{GrowthStage, NUM_CLASSES};
use image::RgbImage;

use crate::{
    meter::Meter,
    nn::{InferModel, InputTensor},
};

/// Class probabilities of one image and the stage they select.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub probabilities: [f32; NUM_CLASSES],
    pub stage: GrowthStage,
}

impl Prediction {
    /// Validate a raw model output and select the most probable stage.
    pub fn from_probabilities(output: &[f32]) -> Result<Self> {
        ensure!(
            output.len() == NUM_CLASSES,
            "expected {} class probabilities, model returned {}",
            NUM_CLASSES,
            output.len()
        );
        if let Some(bad) = output.iter().find(|p| !p.is_finite() || **p < 0.0) {
            bail!("model output {bad} is not a probability");
        }

        let mut probabilities = [0.0; NUM_CLASSES];
        probabilities.copy_from_slice(output);

        let stage = argmax(&probabilities)
            .and_then(GrowthStage::from_index)
            .unwrap_or(GrowthStage::Soil);

        Ok(Self {
            probabilities,
            stage,
        })
    }

    pub fn label(&self) -> &'static str {
        self.stage.label()
    }

    pub fn confidence(&self) -> f32 {
        self.probabilities[self.stage.index()]
    }
}

/// Index of the largest value; ties go to the lowest index.
///
/// NaN never wins a comparison.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => (),
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

/// Run `model` on `image`.
///
/// The input tensor only lives inside this call. It is released before the
/// output is interpreted, whether inference succeeded or not.
pub fn predict(model: &dyn InferModel, image: &RgbImage, meter: &Meter) -> Result<Prediction> {
    let output = {
        let input = InputTensor::from_image(image, model.input_size(), model.layout(), meter)?;
        log::debug!("Running inference on tensor {:?}", input.shape());
        model.run(&input)
    };
    meter.tick_prediction();

    Prediction::from_probabilities(&output?)
}
