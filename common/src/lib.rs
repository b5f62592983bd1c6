//! Common code shared between the `plantcam_server` service and its clients.
pub mod labels;
pub mod protocol;
