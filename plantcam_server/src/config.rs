//! Service configuration.
//!
use clap::{Parser, ValueEnum};

/// Memory layout of the model input tensor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum TensorLayout {
    /// `[batch, height, width, channels]`, as exported from Keras
    #[default]
    Nhwc,
    /// `[batch, channels, height, width]`
    Nchw,
}

#[derive(Parser, Debug, Clone)]
#[clap(author, version)]
pub struct ServerConfig {
    /// Address to serve HTTP on
    #[clap(long, env = "PLANTCAM_ADDRESS", default_value = "127.0.0.1:3000")]
    pub server_address: String,

    /// Path or http(s) URL of the ONNX classification model
    #[clap(long, env = "PLANTCAM_MODEL", default_value = "web_model/model.onnx")]
    pub model: String,

    /// Side length of the square model input
    #[clap(long, default_value_t = 224)]
    pub input_size: u32,

    /// Layout of the model input tensor
    #[clap(long, value_enum, default_value_t = TensorLayout::Nhwc)]
    pub layout: TensorLayout,

    /// Video device of the environment-facing (rear) camera, tried first
    #[clap(long, env = "PLANTCAM_REAR_CAMERA")]
    pub rear_camera: Option<String>,

    /// Video devices to fall back to, in order
    #[clap(long = "camera", default_value = "/dev/video0")]
    pub cameras: Vec<String>,

    /// FourCC of the camera pixel format
    #[clap(long, default_value = "MJPG")]
    pub camera_format: String,

    /// Camera resolution as WIDTHxHEIGHT, defaults to the device maximum
    #[clap(long, value_parser = parse_resolution)]
    pub resolution: Option<(u32, u32)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:3000".into(),
            model: "web_model/model.onnx".into(),
            input_size: 224,
            layout: TensorLayout::Nhwc,
            rear_camera: None,
            cameras: vec!["/dev/video0".into()],
            camera_format: "MJPG".into(),
            resolution: None,
        }
    }
}

impl ServerConfig {
    /// Camera devices in the order they should be tried.
    pub fn camera_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.rear_camera.iter().cloned().collect();
        for device in self.cameras.iter() {
            if !devices.contains(device) {
                devices.push(device.clone());
            }
        }
        devices
    }
}

fn parse_resolution(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value}"))?;
    let width = width.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let height = height.trim().parse::<u32>().map_err(|e| e.to_string())?;
    if width == 0 || height == 0 {
        return Err("resolution must be non-zero".into());
    }
    Ok((width, height))
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn parses_resolution() {
        assert_eq!(parse_resolution("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_resolution("640X480"), Ok((640, 480)));
        assert!(parse_resolution("1280").is_err());
        assert!(parse_resolution("0x720").is_err());
    }

    #[test]
    fn rear_camera_is_tried_first() {
        let config = ServerConfig::parse_from([
            "plantcam_server",
            "--rear-camera",
            "/dev/video2",
            "--camera",
            "/dev/video0",
            "--camera",
            "/dev/video2",
        ]);
        assert_eq!(config.camera_devices(), vec!["/dev/video2", "/dev/video0"]);
    }

    #[test]
    fn defaults_match_cli_defaults() {
        let parsed = ServerConfig::parse_from(["plantcam_server"]);
        let default = ServerConfig::default();
        assert_eq!(parsed.input_size, default.input_size);
        assert_eq!(parsed.layout, default.layout);
        assert_eq!(parsed.cameras, default.cameras);
        assert_eq!(parsed.camera_format, default.camera_format);
    }
}
