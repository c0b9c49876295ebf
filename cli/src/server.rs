//! HTTP/JSON front end
//!
//! | Path | Description |
//! |------|-------------|
//! | `GET /api/health` | Liveness check |
//! | `POST /api/encode` | Text to base64 WAV |
//! | `POST /api/decode` | Base64 WAV to text |
//! | `POST /api/detect` | Chirp detections in a base64 WAV |
//!
//! Every response carries a `request_id` that also tags the server log.

use crate::error::CliError;
use crate::settings::Settings;
use crate::wav::{read_wav, wav_bytes};
use crate::FILE_BLOCK_SIZE;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use sonicwire_core::config::validate_sample_rate;
use sonicwire_core::{
    decode_samples, decoded_text, ChirpDetector, DetectionEvent, Encoder, ModemError, ReceiverEvent,
    ToneRenderer, TransmitOutcome, Transmitter, MODEM_SAMPLE_RATE,
};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    request_id: Uuid,
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    request_id: Uuid,
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(request_id: Uuid, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            message: message.into(),
        }
    }

    fn from_cli(request_id: Uuid, err: CliError) -> Self {
        let status = match &err {
            CliError::Modem(ModemError::EmptyMessage)
            | CliError::Modem(ModemError::MessageTooLong { .. })
            | CliError::Modem(ModemError::NonAsciiCharacter(_))
            | CliError::Modem(ModemError::UnprintableCharacter(_))
            | CliError::Modem(ModemError::InvalidTemplate(_))
            | CliError::Modem(ModemError::InvalidConfig(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            CliError::Wav(_) | CliError::UnsupportedFormat(_) | CliError::Base64(_) | CliError::TemplateSpec(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(request_id, status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(request_id = %self.request_id, status = %self.status, "{}", self.message);
        let body = ErrorBody {
            request_id: self.request_id,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct EncodeRequest {
    pub text: String,
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct EncodeResponse {
    pub request_id: Uuid,
    pub wav_base64: String,
    pub duration_ms: u64,
    pub sample_rate: u32,
}

#[derive(Debug, Deserialize)]
pub struct DecodeRequest {
    pub wav_base64: String,
}

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    pub partial_bits: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecodeResponse {
    pub request_id: Uuid,
    pub text: String,
    pub sessions: Vec<SessionReport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateRequest {
    pub name: String,
    pub duration_secs: f32,
    pub f0: f32,
    pub f1: f32,
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    pub wav_base64: String,
    pub templates: Vec<TemplateRequest>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub block_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub request_id: Uuid,
    pub detections: Vec<DetectionEvent>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/encode", post(encode))
        .route("/api/decode", post(decode))
        .route("/api/detect", post(detect))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, settings: Settings) -> Result<(), CliError> {
    let app = router(AppState::new(settings));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Run CPU-bound work off the async executor.
async fn blocking<T, F>(request_id: Uuid, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CliError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::new(request_id, StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| ApiError::from_cli(request_id, e))
}

async fn encode(State(state): State<AppState>, Json(request): Json<EncodeRequest>) -> Result<Json<EncodeResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let sample_rate = request.sample_rate.unwrap_or(MODEM_SAMPLE_RATE);
    info!(%request_id, chars = request.text.len(), sample_rate, "encode");

    let config = state.settings.modem.clone();
    let (wav, duration_ms) = blocking(request_id, move || {
        validate_sample_rate(sample_rate)?;
        let mut transmitter = Transmitter::new(Encoder::new(config)?);
        let mut renderer = ToneRenderer::new(sample_rate);
        match transmitter.transmit(&request.text, &mut renderer)? {
            TransmitOutcome::Sent { duration_ms, .. } => Ok((wav_bytes(renderer.samples(), sample_rate)?, duration_ms)),
            TransmitOutcome::Rejected(err) => Err(err.into()),
            TransmitOutcome::Cancelled { .. } => Err(ModemError::Emitter("transmission cancelled".to_string()).into()),
        }
    })
    .await?;

    Ok(Json(EncodeResponse {
        request_id,
        wav_base64: BASE64.encode(wav),
        duration_ms,
        sample_rate,
    }))
}

async fn decode(State(state): State<AppState>, Json(request): Json<DecodeRequest>) -> Result<Json<DecodeResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let config = state.settings.modem.clone();

    let events = blocking(request_id, move || {
        let bytes = BASE64.decode(request.wav_base64.as_bytes())?;
        let audio = read_wav(Cursor::new(bytes))?;
        info!(%request_id, seconds = audio.duration_secs(), "decode");
        Ok(decode_samples(&audio.samples, audio.sample_rate, &config)?)
    })
    .await?;

    let sessions = events
        .iter()
        .filter_map(|e| match e {
            ReceiverEvent::SessionEnded {
                start_ms,
                end_ms,
                text,
                partial_bits,
            } if !text.is_empty() || partial_bits.is_some() => Some(SessionReport {
                start_ms: *start_ms,
                end_ms: *end_ms,
                text: text.clone(),
                partial_bits: partial_bits.clone(),
            }),
            _ => None,
        })
        .collect();

    Ok(Json(DecodeResponse {
        request_id,
        text: decoded_text(&events),
        sessions,
    }))
}

async fn detect(State(state): State<AppState>, Json(request): Json<DetectRequest>) -> Result<Json<DetectResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    if request.templates.is_empty() {
        return Err(ApiError::new(request_id, StatusCode::BAD_REQUEST, "at least one template is required"));
    }
    let mut config = state.settings.chirp.clone();

    let detections = blocking(request_id, move || {
        let bytes = BASE64.decode(request.wav_base64.as_bytes())?;
        let audio = read_wav(Cursor::new(bytes))?;
        info!(%request_id, seconds = audio.duration_secs(), templates = request.templates.len(), "detect");

        config.sample_rate = audio.sample_rate;
        let mut detector = ChirpDetector::new(config)?;
        for t in &request.templates {
            detector.add_template(&t.name, t.duration_secs, t.f0, t.f1)?;
        }
        if let Some(threshold) = request.threshold {
            detector.set_detection_threshold(threshold)?;
        }

        Ok(audio
            .samples
            .chunks(request.block_size.unwrap_or(FILE_BLOCK_SIZE).max(1))
            .flat_map(|block| detector.ingest(block))
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(DetectResponse { request_id, detections }))
}
