use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

/// Counters of the prediction pipeline.
///
/// Every input tensor ticks `tensors_created` when it is built and
/// `tensors_released` when it is dropped, so `live_tensors` is zero whenever
/// no prediction is in flight.
#[derive(Default)]
pub struct Meter {
    predictions: AtomicU64,
    tensors_created: AtomicU64,
    tensors_released: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            predictions: AtomicU64::new(0),
            tensors_created: AtomicU64::new(0),
            tensors_released: AtomicU64::new(0),
        }
    }

    pub fn tick_prediction(&self) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_tensor_created(&self) {
        self.tensors_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_tensor_released(&self) {
        self.tensors_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn predictions(&self) -> u64 {
        self.predictions.load(Ordering::Relaxed)
    }

    pub fn tensors_created(&self) -> u64 {
        self.tensors_created.load(Ordering::Relaxed)
    }

    pub fn tensors_released(&self) -> u64 {
        self.tensors_released.load(Ordering::Relaxed)
    }

    pub fn live_tensors(&self) -> u64 {
        // Read released first so a concurrent release can't underflow
        let released = self.tensors_released();
        self.tensors_created().saturating_sub(released)
    }
}

pub fn spawn_meter_logger(meter: Arc<Meter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(Duration::from_secs(30));
        log_interval.tick().await;

        let mut last_predictions = meter.predictions();
        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let predictions = meter.predictions();
            let new_predictions = predictions - last_predictions;
            last_predictions = predictions;

            if new_predictions > 0 {
                let elapsed = start.elapsed().as_secs_f32();
                log::info!(
                    "Predictions per minute: {:.1}, live input tensors: {}",
                    new_predictions as f32 * 60.0 / elapsed,
                    meter.live_tensors()
                );
            }
        }
    })
}
