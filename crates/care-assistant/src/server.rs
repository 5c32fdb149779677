/// HTTP surface for the chat UI.
///
/// | Method | Path | Description |
/// |--------|------|-------------|
/// | `POST` | `/chat` | Answer a text question |
/// | `POST` | `/upload-image` | Store an image (multipart field `image`) |
/// | `POST` | `/analyze-image` | Ask about a stored image |
/// | `GET`  | `/admin/documents` | List the knowledge corpus |
/// | `POST` | `/admin/add` | Add a document (form fields) |
/// | `GET`  | `/status` | Model and corpus size |
///
/// Errors are `{"error": "<message>"}` with a 4xx/5xx status.
use std::sync::Arc;

use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        rejection::{FormRejection, JsonRejection},
        DefaultBodyLimit, State,
    },
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::assistant::{AddDocumentError, Assistant, AssistantError};
use crate::images::ImageError;
use crate::model::{Document, HistoryEntry};

pub fn router(assistant: Arc<Assistant>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/chat", post(handle_chat))
        .route("/upload-image", post(handle_upload_image))
        .route("/analyze-image", post(handle_analyze_image))
        .route("/admin/documents", get(handle_list_documents))
        .route("/admin/add", post(handle_add_document))
        .route("/status", get(handle_status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(assistant)
}

// ============ Error response ============

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message.to_string(),
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: &'static str) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        message,
    }
}

fn not_found(message: &'static str) -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        message,
    }
}

fn internal(message: &'static str) -> ApiError {
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message,
    }
}

#[derive(Debug, Serialize)]
struct AnswerResponse {
    response: String,
}

// ============ POST /chat ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: Option<String>,
    #[serde(default)]
    conversation: Vec<HistoryEntry>,
}

async fn handle_chat(
    State(assistant): State<Arc<Assistant>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let Ok(Json(request)) = payload else {
        warn!("received chat request without a valid body");
        return Err(bad_request("No message provided"));
    };
    let Some(message) = request.message else {
        warn!("received chat request with no message");
        return Err(bad_request("No message provided"));
    };

    let response = assistant.ask(&message, &request.conversation).await;
    Ok(Json(AnswerResponse { response }))
}

// ============ POST /upload-image ============

#[derive(Debug, Serialize)]
struct UploadResponse {
    filename: String,
    success: bool,
}

async fn handle_upload_image(
    State(assistant): State<Arc<Assistant>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        warn!(error = %e, "upload is not a multipart request");
        bad_request("No image provided")
    })?;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(bad_request("No image provided")),
            Err(e) => {
                warn!(error = %e, "malformed multipart upload");
                return Err(bad_request("No image provided"));
            }
        };
        if field.name() != Some("image") {
            continue;
        }

        let original = field.file_name().unwrap_or_default().to_string();
        if original.is_empty() {
            return Err(bad_request("No image selected"));
        }
        if !crate::images::ImageStore::is_allowed(&original) {
            return Err(bad_request("Invalid file type"));
        }

        let bytes = field.bytes().await.map_err(|e| {
            warn!(error = %e, "failed to read upload body");
            bad_request("No image provided")
        })?;

        return match assistant.images().save(&original, &bytes).await {
            Ok(filename) => Ok(Json(UploadResponse {
                filename,
                success: true,
            })),
            Err(ImageError::InvalidType(_)) => Err(bad_request("Invalid file type")),
            Err(e) => {
                error!(error = %e, "failed to save image");
                Err(internal("Failed to save image"))
            }
        };
    }
}

// ============ POST /analyze-image ============

#[derive(Debug, Deserialize)]
struct AnalyzeImageRequest {
    filename: Option<String>,
    question: Option<String>,
    #[serde(default)]
    conversation: Vec<HistoryEntry>,
}

async fn handle_analyze_image(
    State(assistant): State<Arc<Assistant>>,
    payload: Result<Json<AnalyzeImageRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let Ok(Json(request)) = payload else {
        return Err(bad_request("No image specified"));
    };
    let Some(filename) = request.filename else {
        return Err(bad_request("No image specified"));
    };

    match assistant
        .analyze_image(&filename, request.question.as_deref(), &request.conversation)
        .await
    {
        Ok(response) => Ok(Json(AnswerResponse { response })),
        Err(AssistantError::ImageNotFound(_)) => Err(not_found("Image not found")),
        Err(AssistantError::ImageUnreadable { .. }) => Err(internal("Failed to analyze the image")),
    }
}

// ============ /admin ============

#[derive(Debug, Serialize)]
struct DocumentListResponse {
    documents: Vec<Document>,
}

async fn handle_list_documents(State(assistant): State<Arc<Assistant>>) -> Json<DocumentListResponse> {
    Json(DocumentListResponse {
        documents: assistant.documents().await,
    })
}

#[derive(Debug, Deserialize)]
struct AddDocumentForm {
    title: Option<String>,
    content: Option<String>,
    category: Option<String>,
}

async fn handle_add_document(
    State(assistant): State<Arc<Assistant>>,
    form: Result<Form<AddDocumentForm>, FormRejection>,
) -> Result<Redirect, ApiError> {
    let Ok(Form(form)) = form else {
        warn!("received admin form without a valid body");
        return Err(bad_request("Title and content are required"));
    };
    let title = form.title.unwrap_or_default();
    let content = form.content.unwrap_or_default();

    match assistant
        .add_document(&title, &content, form.category.as_deref())
        .await
    {
        Ok(()) => {
            info!(title = %title, "document added via admin");
            Ok(Redirect::to("/admin/documents"))
        }
        Err(AddDocumentError::MissingFields) => Err(bad_request("Title and content are required")),
        Err(AddDocumentError::Storage(e)) => {
            error!(error = %e, "failed to add document");
            Err(internal("Failed to add document"))
        }
    }
}

// ============ GET /status ============

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    model: String,
    documents: usize,
}

async fn handle_status(State(assistant): State<Arc<Assistant>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "online",
        model: assistant.model().to_string(),
        documents: assistant.document_count().await,
    })
}
