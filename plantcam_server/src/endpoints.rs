//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    body::StreamBody,
    extract::{DefaultBodyLimit, Multipart, Path},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use bytes::Bytes;
use futures::{future, StreamExt};
use tokio_stream::wrappers::WatchStream;

use crate::{context::AppContext, error::AppError, upload::UploadFile};

/// Largest accepted upload request.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build the HTTP router on top of the application context.
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/status", get(status))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/gallery", get(gallery))
        .route("/gallery/:id/image", get(gallery_image))
        .route("/gallery/:id/predict", post(predict))
        .route("/webcam/start", post(start_webcam))
        .route("/webcam/snap", post(snap))
        .route("/webcam/stop", post(stop_webcam))
        .route("/webcam/stream", get(webcam_stream))
        .route("/result", get(result))
        .route("/chart.svg", get(chart))
        .layer(Extension(ctx))
}

/// Host page.
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn status(Extension(ctx): Extension<Arc<AppContext>>) -> impl IntoResponse {
    Json(ctx.status().await)
}

/// Receive one or more image files as multipart form.
pub async fn upload(
    Extension(ctx): Extension<Arc<AppContext>>,
    mut multipart: Multipart,
) -> Response {
    let mut files = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let file_name = field.file_name().map(str::to_owned);
                match field.bytes().await {
                    // Browsers send an empty part when no file was selected
                    Ok(data) if data.is_empty() => (),
                    Ok(data) => files.push(UploadFile { file_name, data }),
                    Err(err) => return err.into_response(),
                }
            }
            Ok(None) => break,
            Err(err) => return err.into_response(),
        }
    }

    log::info!("Received {} file(s) for upload", files.len());
    Json(ctx.upload(files).await).into_response()
}

pub async fn gallery(Extension(ctx): Extension<Arc<AppContext>>) -> impl IntoResponse {
    Json(ctx.gallery().views())
}

pub async fn gallery_image(
    Extension(ctx): Extension<Arc<AppContext>>,
    Path(id): Path<u64>,
) -> Response {
    match ctx.gallery().get(id) {
        Some(entry) => {
            ([(header::CONTENT_TYPE, entry.mime)], entry.encoded.clone()).into_response()
        }
        None => (StatusCode::NOT_FOUND, format!("gallery entry {id} not found")).into_response(),
    }
}

/// Predict the growth stage of a gallery entry.
pub async fn predict(Extension(ctx): Extension<Arc<AppContext>>, Path(id): Path<u64>) -> Response {
    match ctx.predict_entry(id).await {
        Ok(_) => Json(ctx.result_view()).into_response(),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn start_webcam(Extension(ctx): Extension<Arc<AppContext>>) -> Response {
    match ctx.start_webcam().await {
        Ok(info) => Json(info).into_response(),
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn snap(Extension(ctx): Extension<Arc<AppContext>>) -> Response {
    match ctx.snap().await {
        Ok(id) => match ctx.gallery().get(id) {
            Some(entry) => Json(entry.view()).into_response(),
            None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Err(err) => failure(&ctx, &err),
    }
}

pub async fn stop_webcam(Extension(ctx): Extension<Arc<AppContext>>) -> StatusCode {
    match ctx.stop_webcam().await {
        true => StatusCode::NO_CONTENT,
        false => StatusCode::NOT_FOUND,
    }
}

/// Live camera surface as MJPEG stream.
pub async fn webcam_stream(Extension(ctx): Extension<Arc<AppContext>>) -> Response {
    let Some(frames) = ctx.camera_frames().await else {
        return (StatusCode::NOT_FOUND, "no active camera stream").into_response();
    };
    log::info!("Camera stream requested");

    let stream = WatchStream::new(frames).filter_map(|frame| {
        future::ready(frame.map(|data| Ok::<_, std::io::Error>(as_jpeg_stream_item(&data))))
    });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body).into_response()
}

pub async fn result(Extension(ctx): Extension<Arc<AppContext>>) -> impl IntoResponse {
    Json(ctx.result_view())
}

pub async fn chart(Extension(ctx): Extension<Arc<AppContext>>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "image/svg+xml"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        ctx.chart_svg(),
    )
}

/// Response of a failed action: the result as it now reads, with a status
/// matching the failure.
fn failure(ctx: &AppContext, err: &AppError) -> Response {
    let status = match err {
        AppError::UnknownEntry(_) => StatusCode::NOT_FOUND,
        AppError::ModelLoad(_) | AppError::NoModel | AppError::Camera(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AppError::Prediction(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(ctx.result_view())).into_response()
}

fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}
