//! Growth-stage classification of plant images from uploads and a webcam.
pub mod config;
pub mod context;
pub mod endpoints;
pub mod error;
pub mod gallery;
pub mod meter;
pub mod nn;
pub mod pipeline;
pub mod presenter;
pub mod sensors;
pub mod upload;
pub mod utils;
pub mod webcam;
