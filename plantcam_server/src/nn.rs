use std::{path::Path, sync::Arc};

use anyhow::{ensure, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::{
    config::{ServerConfig, TensorLayout},
    meter::Meter,
    utils::fetch_cached,
};

type RunFn = Box<dyn Fn(TVec<TValue>) -> TractResult<TVec<TValue>> + Send + Sync>;

/// A loaded classification model.
pub trait InferModel: Send + Sync {
    /// Side length of the square input the model expects.
    fn input_size(&self) -> u32;

    fn layout(&self) -> TensorLayout;

    /// Run the model on a batch of one and return the flattened output.
    fn run(&self, input: &InputTensor) -> Result<Vec<f32>>;
}

/// Model input built from one image.
///
/// Creation and release are counted on the [`Meter`]. The tensor is released
/// when this value is dropped, which includes unwinding out of a failed
/// inference.
pub struct InputTensor<'m> {
    tensor: Arc<Tensor>,
    meter: &'m Meter,
}

impl<'m> InputTensor<'m> {
    /// Resize `image` to `size`×`size` with nearest-neighbour sampling, convert
    /// the pixels to `f32` and add a leading batch dimension.
    ///
    /// Pixel values stay in `0.0..=255.0`; the model normalizes internally.
    pub fn from_image(
        image: &RgbImage,
        size: u32,
        layout: TensorLayout,
        meter: &'m Meter,
    ) -> Result<Self> {
        let (width, height) = image.dimensions();
        ensure!(width > 0 && height > 0, "image is empty ({width}x{height})");
        ensure!(size > 0, "model input size must be non-zero");

        let xs = nearest_indices(width, size);
        let ys = nearest_indices(height, size);
        let size = size as usize;

        let tensor: Tensor = match layout {
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
                    image[(xs[x], ys[y])][c] as f32
                })
                .into()
            }
            TensorLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
                    image[(xs[x], ys[y])][c] as f32
                })
                .into()
            }
        };

        meter.tick_tensor_created();
        Ok(Self {
            tensor: Arc::new(tensor),
            meter,
        })
    }

    pub fn tensor(&self) -> &Arc<Tensor> {
        &self.tensor
    }

    pub fn shape(&self) -> &[usize] {
        self.tensor.shape()
    }
}

impl Drop for InputTensor<'_> {
    fn drop(&mut self) {
        self.meter.tick_tensor_released();
    }
}

/// Source index for every destination index of a nearest-neighbour resize.
///
/// Uses `floor(dst * src_len / dst_len)`, i.e. no corner alignment and no
/// half-pixel offset.
fn nearest_indices(src_len: u32, dst_len: u32) -> Vec<u32> {
    (0..dst_len)
        .map(|dst| {
            let src = (dst as u64 * src_len as u64) / dst_len as u64;
            (src as u32).min(src_len - 1)
        })
        .collect()
}

/// ONNX model executed with tract.
pub struct TractModel {
    run_fn: RunFn,
    input_size: u32,
    layout: TensorLayout,
}

impl TractModel {
    pub fn from_path(
        path: impl AsRef<Path>,
        input_size: u32,
        layout: TensorLayout,
    ) -> Result<Self> {
        let path = path.as_ref();
        let size = input_size as usize;
        let shape = match layout {
            TensorLayout::Nhwc => tvec!(1, size, size, 3),
            TensorLayout::Nchw => tvec!(1, 3, size, size),
        };
        let input_fact = InferenceFact::dt_shape(f32::datum_type(), shape);

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to read model {}", path.display()))?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self {
            run_fn: Box::new(move |inputs| model.run(inputs)),
            input_size,
            layout,
        })
    }
}

impl InferModel for TractModel {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn layout(&self) -> TensorLayout {
        self.layout
    }

    fn run(&self, input: &InputTensor) -> Result<Vec<f32>> {
        let raw_nn_out = (self.run_fn)(tvec!(TValue::Const(Arc::clone(input.tensor()))))?;
        let output = raw_nn_out
            .first()
            .context("model produced no output")?
            .to_array_view::<f32>()?
            .iter()
            .copied()
            .collect();

        Ok(output)
    }
}

/// Fetch and deserialize the model named in the configuration.
pub async fn load_model(config: &ServerConfig) -> Result<Arc<dyn InferModel>> {
    let path = fetch_cached(&config.model).await?;
    let (input_size, layout) = (config.input_size, config.layout);

    log::info!("Loading model {}", path.display());
    let model = tokio::task::spawn_blocking(move || TractModel::from_path(path, input_size, layout))
        .await
        .context("model loading task failed")??;

    Ok(Arc::new(model))
}

#[cfg(test)]
mod test {

    use image::Rgb;

    use super::*;

    #[test]
    fn nearest_indices_downscale_picks_floor() {
        assert_eq!(nearest_indices(8, 4), vec![0, 2, 4, 6]);
        assert_eq!(nearest_indices(5, 2), vec![0, 2]);
    }

    #[test]
    fn nearest_indices_upscale_repeats() {
        assert_eq!(nearest_indices(2, 4), vec![0, 0, 1, 1]);
        assert_eq!(nearest_indices(1, 3), vec![0, 0, 0]);
    }

    #[test]
    fn input_tensor_is_batched_nhwc() -> Result<()> {
        let meter = Meter::new();
        let mut image = RgbImage::new(448, 300);
        image.put_pixel(2, 0, Rgb([10, 20, 30]));

        let input = InputTensor::from_image(&image, 224, TensorLayout::Nhwc, &meter)?;
        assert_eq!(input.shape(), &[1, 224, 224, 3]);

        let view = input.tensor().to_array_view::<f32>()?;
        // Destination x=1 samples source x=2
        assert_eq!(view[[0, 0, 1, 0]], 10.0);
        assert_eq!(view[[0, 0, 1, 1]], 20.0);
        assert_eq!(view[[0, 0, 1, 2]], 30.0);
        assert_eq!(view[[0, 0, 0, 0]], 0.0);

        Ok(())
    }

    #[test]
    fn input_tensor_nchw_moves_channels_first() -> Result<()> {
        let meter = Meter::new();
        let image = RgbImage::from_pixel(3, 3, Rgb([1, 2, 3]));

        let input = InputTensor::from_image(&image, 4, TensorLayout::Nchw, &meter)?;
        assert_eq!(input.shape(), &[1, 3, 4, 4]);

        let view = input.tensor().to_array_view::<f32>()?;
        assert_eq!(view[[0, 2, 3, 3]], 3.0);

        Ok(())
    }

    #[test]
    fn input_tensor_release_is_counted() -> Result<()> {
        let meter = Meter::new();
        let image = RgbImage::new(10, 10);
        {
            let _input = InputTensor::from_image(&image, 4, TensorLayout::Nhwc, &meter)?;
            assert_eq!(meter.live_tensors(), 1);
        }
        assert_eq!(meter.tensors_created(), 1);
        assert_eq!(meter.tensors_released(), 1);

        Ok(())
    }

    #[test]
    fn empty_image_creates_no_tensor() {
        let meter = Meter::new();
        let image = RgbImage::new(0, 10);
        assert!(InputTensor::from_image(&image, 224, TensorLayout::Nhwc, &meter).is_err());
        assert_eq!(meter.tensors_created(), 0);
    }

    fn fixture_path() -> &'static str {
        concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/dominant_channel.onnx"
        )
    }

    #[test]
    fn tract_model_runs_fixture() -> Result<()> {
        let meter = Meter::new();
        let model = TractModel::from_path(fixture_path(), 224, TensorLayout::Nhwc)?;
        assert_eq!(model.input_size(), 224);

        // Fixture votes with the dominant colour channel: red 0, green 2, blue 5
        let image = RgbImage::from_pixel(320, 240, Rgb([0, 250, 0]));
        let input = InputTensor::from_image(&image, model.input_size(), model.layout(), &meter)?;
        let output = model.run(&input)?;

        assert_eq!(output.len(), 6);
        assert!((output.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert!(output[2] > 0.99, "{output:?}");

        Ok(())
    }

    #[test]
    fn missing_model_file_fails() {
        let result = TractModel::from_path("does/not/exist.onnx", 224, TensorLayout::Nhwc);
        assert!(result.is_err());
    }
}
