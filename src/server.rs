//! # HTTP Server for Label Printing
//!
//! Exposes the orchestrator over a small JSON API so other services can
//! submit label jobs without speaking the printer protocol.
//!
//! ## Usage
//!
//! ```bash
//! etiqueta serve --listen 0.0.0.0:8080
//! ```
//!
//! ## Endpoints
//!
//! | Method | Path      | Description                                |
//! |--------|-----------|--------------------------------------------|
//! | GET    | `/health` | Liveness probe, always 200                 |
//! | POST   | `/print`  | Multipart upload: `image` file + options   |
//!
//! `/print` returns the serialized [`PrintOutcome`] as JSON: 200 when the
//! job printed, 502 when every transport failed, 400 for malformed input.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::error::EtiquetaError;
use crate::job::{Orchestrator, PrintJob};
use crate::printer::{PrinterConfig, RasterPolarity};
use crate::protocol::commands::LabelType;
use crate::raster::RasterImage;

/// Uploads above this size are rejected before parsing
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:8080")
    pub listen_addr: String,
}

/// Application state shared across handlers.
pub struct AppState {
    pub orchestrator: Orchestrator,
}

/// Fields accepted by the `/print` multipart form.
#[derive(Debug, Default)]
struct PrintRequest {
    image: Option<Vec<u8>>,
    copies: Option<u16>,
    density: Option<u8>,
    label_type: Option<LabelType>,
}

/// Start the HTTP server.
///
/// ## Example
///
/// ```no_run
/// use etiqueta::job::Orchestrator;
/// use etiqueta::server::{serve, ServerConfig};
///
/// # async fn example(orchestrator: Orchestrator) -> Result<(), etiqueta::error::EtiquetaError> {
/// let config = ServerConfig {
///     listen_addr: "0.0.0.0:8080".to_string(),
/// };
///
/// serve(config, orchestrator).await?;
/// # Ok(())
/// # }
/// ```
pub async fn serve(config: ServerConfig, orchestrator: Orchestrator) -> Result<(), EtiquetaError> {
    let app_state = Arc::new(AppState { orchestrator });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/print",
            post(print_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    tracing::info!(listen = %config.listen_addr, "HTTP server starting");

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| {
            EtiquetaError::Transport(format!("Failed to bind to {}: {}", config.listen_addr, e))
        })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| EtiquetaError::Transport(format!("Server error: {}", e)))?;

    Ok(())
}

/// Handle GET /health.
async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "printer": PrinterConfig::B1.name,
    }))
}

/// Handle POST /print - decode the upload and run it through the
/// orchestrator.
async fn print_handler(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let PrintRequest {
        image,
        copies,
        density,
        label_type,
    } = match collect_fields(multipart).await {
        Ok(req) => req,
        Err(msg) => return bad_request(&msg),
    };

    let Some(image_bytes) = image else {
        return bad_request("missing required field: image");
    };

    let options = state.orchestrator.options();
    let job = match build_job(&image_bytes, copies, density, label_type, options.polarity) {
        Ok(job) => job,
        Err(e) => return bad_request(&e.to_string()),
    };

    let outcome = state.orchestrator.print(&job).await;
    let status = if outcome.is_success() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    (status, Json(outcome)).into_response()
}

/// Read the multipart fields into a [`PrintRequest`].
async fn collect_fields(mut multipart: Multipart) -> Result<PrintRequest, String> {
    let mut request = PrintRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("malformed multipart body: {}", e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| format!("failed to read image field: {}", e))?;
                request.image = Some(bytes.to_vec());
            }
            "copies" => {
                let text = field_text(field, "copies").await?;
                request.copies =
                    Some(text.parse().map_err(|_| {
                        format!("copies must be a positive integer, got {:?}", text)
                    })?);
            }
            "density" => {
                let text = field_text(field, "density").await?;
                request.density = Some(
                    text.parse()
                        .map_err(|_| format!("density must be 1-5, got {:?}", text))?,
                );
            }
            "label_type" => {
                let text = field_text(field, "label_type").await?;
                request.label_type = Some(parse_label_type(&text)?);
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }

    Ok(request)
}

async fn field_text(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String, String> {
    field
        .text()
        .await
        .map_err(|e| format!("failed to read {} field: {}", name, e))
}

fn parse_label_type(s: &str) -> Result<LabelType, String> {
    match s.to_lowercase().as_str() {
        "gap" => Ok(LabelType::Gap),
        "black_mark" | "black-mark" | "blackmark" => Ok(LabelType::BlackMark),
        "continuous" => Ok(LabelType::Continuous),
        other => Err(format!(
            "label_type must be gap, black_mark, or continuous, got {:?}",
            other
        )),
    }
}

/// Decode the uploaded image and assemble the job.
///
/// `polarity` must be the one the orchestrator's sessions run with, so the
/// configured firmware variant reaches the raster stage.
fn build_job(
    image_bytes: &[u8],
    copies: Option<u16>,
    density: Option<u8>,
    label_type: Option<LabelType>,
    polarity: RasterPolarity,
) -> Result<PrintJob, EtiquetaError> {
    let decoded = image::load_from_memory(image_bytes)
        .map_err(|e| EtiquetaError::Image(format!("could not decode uploaded image: {}", e)))?;
    let raster = RasterImage::from_gray(&decoded.to_luma8(), polarity)?;

    let mut job = PrintJob::new(raster, copies.unwrap_or(1));
    if let Some(density) = density {
        if !(1..=5).contains(&density) {
            return Err(EtiquetaError::Encoding(format!(
                "density must be 1-5, got {}",
                density
            )));
        }
        job = job.with_density(density);
    }
    if let Some(label_type) = label_type {
        job = job.with_label_type(label_type);
    }
    Ok(job)
}

fn bad_request(msg: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "status": "rejected", "reason": msg })),
    )
        .into_response()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label_type_accepts_aliases() {
        assert_eq!(parse_label_type("gap").unwrap(), LabelType::Gap);
        assert_eq!(parse_label_type("black-mark").unwrap(), LabelType::BlackMark);
        assert_eq!(parse_label_type("BlackMark").unwrap(), LabelType::BlackMark);
        assert_eq!(parse_label_type("continuous").unwrap(), LabelType::Continuous);
        assert!(parse_label_type("round").is_err());
    }

    fn png_bytes(width: u32, height: u32, luma: u8) -> Vec<u8> {
        let img = image::GrayImage::from_pixel(width, height, image::Luma([luma]));
        let mut png = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut png),
            image::ImageFormat::Png,
        )
        .unwrap();
        png
    }

    #[test]
    fn test_build_job_decodes_png_and_applies_options() {
        let png = png_bytes(100, 40, 0);
        let job = build_job(
            &png,
            Some(3),
            Some(5),
            Some(LabelType::Continuous),
            RasterPolarity::default(),
        )
        .unwrap();
        assert_eq!(job.copies, 3);
        assert_eq!(job.density, 5);
        assert_eq!(job.label_type, LabelType::Continuous);
        assert_eq!(job.image.height(), 40);
    }

    #[test]
    fn test_build_job_honors_polarity() {
        // A black source prints everywhere under the canonical convention
        // and nowhere under the direct one
        let png = png_bytes(384, 2, 0);
        let canonical = build_job(&png, None, None, None, RasterPolarity::InvertThenThreshold)
            .unwrap();
        let direct =
            build_job(&png, None, None, None, RasterPolarity::DirectThreshold).unwrap();
        assert_ne!(canonical.image.rows(), direct.image.rows());
    }

    #[test]
    fn test_build_job_rejects_out_of_range_density() {
        let png = png_bytes(10, 10, 0);
        let err = build_job(&png, None, Some(9), None, RasterPolarity::default()).unwrap_err();
        assert!(matches!(err, crate::error::EtiquetaError::Encoding(_)));
    }

    #[test]
    fn test_build_job_rejects_garbage_bytes() {
        assert!(build_job(b"not an image", None, None, None, RasterPolarity::default()).is_err());
    }
}
