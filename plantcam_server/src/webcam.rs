//! Webcam adapter: live stream and still snapshots.
//!
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use common::protocol::StreamInfo;
use image::{ImageFormat, RgbImage};
use tokio::sync::{oneshot, watch, Mutex};

use crate::sensors::{CameraProvider, OpenedCamera};

/// Latest captured frame, JPEG encoded. `None` until the first capture.
pub type FrameReceiver = watch::Receiver<Option<Bytes>>;

/// How long a snapshot waits for the first frame of a fresh stream.
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive capture failures after which the stream gives up.
const MAX_CAPTURE_FAILURES: u32 = 50;

/// The single camera of the application.
pub struct Webcam {
    provider: Arc<dyn CameraProvider>,
    session: Mutex<Option<CameraSession>>,
}

impl Webcam {
    pub fn new(provider: Arc<dyn CameraProvider>) -> Self {
        Self {
            provider,
            session: Mutex::new(None),
        }
    }

    /// Acquire the camera and start streaming.
    ///
    /// A running stream is released before the camera is acquired again.
    /// Resolves once the native resolution of the new stream is known.
    pub async fn start(&self) -> Result<StreamInfo> {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            log::info!("Releasing camera {} before restarting", previous.info.device);
            previous.release().await;
        }

        let new_session = CameraSession::open(Arc::clone(&self.provider)).await?;
        let info = new_session.info.clone();
        log::info!(
            "Streaming from {} at {}x{}",
            info.device,
            info.width,
            info.height
        );
        *session = Some(new_session);

        Ok(info)
    }

    /// Release the camera. Returns whether a stream was running.
    pub async fn stop(&self) -> bool {
        match self.session.lock().await.take() {
            Some(session) => {
                session.release().await;
                true
            }
            None => false,
        }
    }

    /// Capture the current frame as a still image at the stream's native
    /// resolution. The stream keeps running.
    pub async fn snap(&self) -> Result<RgbImage> {
        let (info, mut frames) = {
            let session = self.session.lock().await;
            let session = session.as_ref().context("no active camera stream")?;
            (session.info.clone(), session.frames.clone())
        };

        let frame = tokio::time::timeout(FIRST_FRAME_TIMEOUT, frames.wait_for(Option::is_some))
            .await
            .context("timed out waiting for a camera frame")?
            .map_err(|_| anyhow!("camera stream ended"))?
            .clone()
            .context("camera stream has no frame")?;

        let image = tokio::task::spawn_blocking(move || {
            image::load_from_memory_with_format(&frame, ImageFormat::Jpeg)
                .map(|image| image.to_rgb8())
        })
        .await
        .context("frame decoding task failed")?
        .context("failed to decode camera frame")?;

        log::debug!(
            "Snapped {}x{} frame from {}",
            image.width(),
            image.height(),
            info.device
        );
        Ok(image)
    }

    /// Metadata of the running stream.
    pub async fn info(&self) -> Option<StreamInfo> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.info.clone())
    }

    /// Subscribe to the frames of the running stream.
    pub async fn frames(&self) -> Option<FrameReceiver> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.frames.clone())
    }
}

/// An acquired camera and the thread capturing from it.
struct CameraSession {
    info: StreamInfo,
    frames: FrameReceiver,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CameraSession {
    async fn open(provider: Arc<dyn CameraProvider>) -> Result<Self> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (frame_tx, frame_rx) = watch::channel(None);
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("camera".into())
                .spawn(move || capture_loop(provider, ready_tx, frame_tx, running))?
        };

        let info = ready_rx
            .await
            .map_err(|_| anyhow!("camera thread exited before the stream was ready"))??;

        Ok(Self {
            info,
            frames: frame_rx,
            running,
            thread: Some(thread),
        })
    }

    /// Stop capturing and wait until the device is closed.
    async fn release(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if tokio::task::spawn_blocking(move || thread.join())
                .await
                .map(|joined| joined.is_err())
                .unwrap_or(true)
            {
                log::error!("Camera thread of {} panicked", self.info.device);
            }
        }
        log::info!("Released camera {}", self.info.device);
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        // Lets the capture thread wind down if the session is dropped unreleased
        self.running.store(false, Ordering::Release);
    }
}

fn capture_loop(
    provider: Arc<dyn CameraProvider>,
    ready_tx: oneshot::Sender<Result<StreamInfo>>,
    frame_tx: watch::Sender<Option<Bytes>>,
    running: Arc<AtomicBool>,
) {
    let OpenedCamera { device, mut camera } = match provider.open() {
        Ok(opened) => opened,
        Err(err) => {
            ready_tx.send(Err(err)).ok();
            return;
        }
    };

    let (width, height) = camera.resolution();
    let info = StreamInfo {
        device,
        width,
        height,
    };
    if ready_tx.send(Ok(info)).is_err() {
        // Nobody is waiting for the stream anymore
        return;
    }

    let mut failures = 0;
    while running.load(Ordering::Acquire) {
        match camera.capture() {
            Ok(frame) => {
                failures = 0;
                frame_tx.send_replace(Some(frame));
            }
            Err(err) => {
                failures += 1;
                log::warn!("Unable to capture frame: {:#}", err);
                if failures >= MAX_CAPTURE_FAILURES {
                    log::error!("Giving up on camera after {} failed captures", failures);
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

#[cfg(test)]
mod test {

    use std::{io::Cursor, sync::atomic::AtomicUsize};

    use image::{ImageOutputFormat, Rgb};

    use super::*;
    use crate::sensors::CameraDevice;

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        live: AtomicUsize,
        max_live: AtomicUsize,
    }

    struct FakeCamera {
        frame: Bytes,
        resolution: (u32, u32),
        counters: Arc<Counters>,
    }

    impl CameraDevice for FakeCamera {
        fn resolution(&self) -> (u32, u32) {
            self.resolution
        }

        fn capture(&mut self) -> Result<Bytes> {
            std::thread::sleep(Duration::from_millis(2));
            Ok(self.frame.clone())
        }
    }

    impl Drop for FakeCamera {
        fn drop(&mut self) {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct FakeProvider {
        resolution: (u32, u32),
        counters: Arc<Counters>,
    }

    impl FakeProvider {
        fn new(width: u32, height: u32) -> Self {
            Self {
                resolution: (width, height),
                counters: Arc::default(),
            }
        }
    }

    impl CameraProvider for FakeProvider {
        fn open(&self) -> Result<OpenedCamera> {
            let (width, height) = self.resolution;
            let image = RgbImage::from_pixel(width, height, Rgb([40, 140, 60]));
            let mut buf = Cursor::new(Vec::new());
            image.write_to(&mut buf, ImageOutputFormat::Jpeg(90))?;

            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.max_live.fetch_max(live, Ordering::SeqCst);

            Ok(OpenedCamera {
                device: "fake0".into(),
                camera: Box::new(FakeCamera {
                    frame: Bytes::from(buf.into_inner()),
                    resolution: self.resolution,
                    counters: Arc::clone(&self.counters),
                }),
            })
        }
    }

    /// Camera that never delivers a frame.
    struct SilentCamera;

    impl CameraDevice for SilentCamera {
        fn resolution(&self) -> (u32, u32) {
            (8, 8)
        }

        fn capture(&mut self) -> Result<Bytes> {
            std::thread::sleep(Duration::from_millis(10));
            Err(anyhow!("no signal"))
        }
    }

    struct SilentProvider;

    impl CameraProvider for SilentProvider {
        fn open(&self) -> Result<OpenedCamera> {
            Ok(OpenedCamera {
                device: "silent0".into(),
                camera: Box::new(SilentCamera),
            })
        }
    }

    struct BrokenProvider;

    impl CameraProvider for BrokenProvider {
        fn open(&self) -> Result<OpenedCamera> {
            Err(anyhow!("permission denied"))
        }
    }

    #[tokio::test]
    async fn snap_matches_native_resolution_and_keeps_streaming() -> Result<()> {
        let webcam = Webcam::new(Arc::new(FakeProvider::new(64, 48)));
        let info = webcam.start().await?;
        assert_eq!((info.width, info.height), (64, 48));

        let image = webcam.snap().await?;
        assert_eq!(image.dimensions(), (64, 48));

        // Still streaming after the snapshot
        assert_eq!(webcam.info().await, Some(info));
        let mut frames = webcam.frames().await.expect("active stream");
        frames.changed().await?;
        assert!(frames.borrow().is_some());

        let second = webcam.snap().await?;
        assert_eq!(second.dimensions(), (64, 48));

        assert!(webcam.stop().await);
        Ok(())
    }

    #[tokio::test]
    async fn restart_releases_previous_camera_first() -> Result<()> {
        let provider = Arc::new(FakeProvider::new(16, 16));
        let counters = Arc::clone(&provider.counters);
        let webcam = Webcam::new(provider);

        webcam.start().await?;
        webcam.start().await?;
        webcam.start().await?;

        assert_eq!(counters.opened.load(Ordering::SeqCst), 3);
        assert_eq!(counters.max_live.load(Ordering::SeqCst), 1);
        assert_eq!(counters.live.load(Ordering::SeqCst), 1);

        assert!(webcam.stop().await);
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);
        assert!(!webcam.stop().await);

        Ok(())
    }

    #[tokio::test]
    async fn stop_ends_frame_stream() -> Result<()> {
        let webcam = Webcam::new(Arc::new(FakeProvider::new(8, 8)));
        webcam.start().await?;
        let mut frames = webcam.frames().await.expect("active stream");

        webcam.stop().await;
        // Sender is gone once the capture thread has exited
        while frames.changed().await.is_ok() {}
        assert!(webcam.frames().await.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn open_failure_is_reported() {
        let webcam = Webcam::new(Arc::new(BrokenProvider));
        let err = webcam.start().await.unwrap_err();
        assert!(format!("{err:#}").contains("permission denied"));
        assert!(webcam.info().await.is_none());
    }

    #[tokio::test]
    async fn snap_without_stream_fails() {
        let webcam = Webcam::new(Arc::new(FakeProvider::new(8, 8)));
        assert!(webcam.snap().await.is_err());
    }

    #[tokio::test]
    async fn pending_snap_does_not_block_status() -> Result<()> {
        let webcam = Arc::new(Webcam::new(Arc::new(SilentProvider)));
        webcam.start().await?;

        let snapping = {
            let webcam = Arc::clone(&webcam);
            tokio::spawn(async move { webcam.snap().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Snap is still waiting for a first frame
        let info = tokio::time::timeout(Duration::from_secs(1), webcam.info()).await?;
        assert_eq!(info.map(|info| info.device), Some("silent0".to_owned()));
        let stopped = tokio::time::timeout(Duration::from_secs(1), webcam.stop()).await?;
        assert!(stopped);

        // Stopping ends the stream the snap was waiting on
        assert!(snapping.await?.is_err());

        Ok(())
    }
}
