//! Sensors module.
//!
use anyhow::{bail, ensure, Result};
use bytes::Bytes;
use rscam::{Camera, Config};
use simple_error::simple_error;

/// An opened, streaming camera.
///
/// Dropping the value stops the stream and releases the device.
pub trait CameraDevice {
    /// Native resolution of the frames.
    fn resolution(&self) -> (u32, u32);

    /// Block until the next frame and return it JPEG encoded.
    fn capture(&mut self) -> Result<Bytes>;
}

/// A camera opened by a [`CameraProvider`].
pub struct OpenedCamera {
    pub device: String,
    pub camera: Box<dyn CameraDevice>,
}

/// Source of cameras.
///
/// `open` is called on the thread that captures the frames; the returned
/// device never leaves that thread.
pub trait CameraProvider: Send + Sync {
    fn open(&self) -> Result<OpenedCamera>;
}

/// Cameras available via Video4Linux.
///
/// Devices are tried in order, so the environment-facing (rear) camera should
/// come first. If it cannot be opened, the next device is used.
pub struct V4lCameraProvider {
    devices: Vec<String>,
    format: String,
    resolution: Option<(u32, u32)>,
}

impl V4lCameraProvider {
    pub fn new(devices: Vec<String>, format: &str, resolution: Option<(u32, u32)>) -> Self {
        Self {
            devices,
            format: format.to_owned(),
            resolution,
        }
    }
}

impl CameraProvider for V4lCameraProvider {
    fn open(&self) -> Result<OpenedCamera> {
        let mut errors = Vec::new();
        for device in self.devices.iter() {
            match V4lCamera::open(device, &self.format, self.resolution) {
                Ok(camera) => {
                    return Ok(OpenedCamera {
                        device: device.clone(),
                        camera: Box::new(camera),
                    })
                }
                Err(err) => {
                    log::warn!("Could not open camera {}: {:#}", device, err);
                    errors.push(format!("{device}: {err:#}"));
                }
            }
        }

        if errors.is_empty() {
            bail!("no camera device configured");
        }
        bail!("no usable camera ({})", errors.join("; "))
    }
}

/// Camera on a Linux machine.
pub struct V4lCamera {
    cam: Camera,
    resolution: (u32, u32),
}

impl V4lCamera {
    /// Open and start a video device.
    ///
    /// Without an explicit `resolution` the largest one the device supports
    /// for `format` is used, at the highest frame rate available for it.
    pub fn open(device_name: &str, format: &str, resolution: Option<(u32, u32)>) -> Result<Self> {
        // Frames are handed out as JPEG
        ensure!(format == "MJPG", "unsupported pixel format {format}, only MJPG is supported");

        let mut cam = Camera::new(device_name)?;
        log_supported_formats(&cam, format);
        let format = format.as_bytes();

        log::info!("Using camera {}", device_name);

        let resolution = resolution
            .map(Ok)
            .unwrap_or_else(|| get_max_resolution(&cam, format))?;
        let frame_rate = get_max_frame_rate(&cam, format, resolution)?;

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format,
            ..Default::default()
        })?;

        Ok(Self { cam, resolution })
    }
}

impl CameraDevice for V4lCamera {
    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn capture(&mut self) -> Result<Bytes> {
        let frame = self.cam.capture()?;
        Ok(Bytes::copy_from_slice(&frame[..]))
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Get the highest resolution in terms of number of pixels
            .max_by_key(|(width, height)| width * height)
            .copied(),
        rscam::ResolutionInfo::Stepwise {
            min: _,
            max,
            step: _,
        } => Some(max),
    }
    .ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the maximum supported frame rate for the given format and resolution.
///
/// Intervals are `(numerator, denominator)` seconds per frame.
fn get_max_frame_rate(cam: &Camera, format: &[u8], resolution: (u32, u32)) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .filter(|(numerator, _)| *numerator > 0)
            // Get the shortest interval, i.e. the highest frame rate
            .max_by(|(n_a, d_a), (n_b, d_b)| {
                (*d_a as u64 * *n_b as u64).cmp(&(*d_b as u64 * *n_a as u64))
            })
            .copied(),
        rscam::IntervalInfo::Stepwise {
            min,
            max: _,
            step: _,
        } => Some(min),
    }
    .ok_or_else(|| simple_error!("No frame rate found").into())
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}
