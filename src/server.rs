//! JSON HTTP service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents` | Index a batch of files (multipart) or text documents (JSON) |
//! | `GET`  | `/documents` | Outcomes of every ingested document, newest first |
//! | `GET`  | `/documents/{id}` | Outcome of one document |
//! | `DELETE` | `/documents/{id}` | Drop a document's records from the index |
//! | `POST` | `/query` | Answer a question with cited sources |
//! | `GET`  | `/health` | Status, version, and stored record count |
//!
//! Multipart uploads carry one file per part; the part's file name and
//! content type are used for format detection. JSON uploads send
//! `{"documents": [{"file_name", "content", "content_type"?}]}` with plain
//! text content.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400) for invalid input or configuration,
//! `not_found` (404) for unknown document ids, `internal` (500) for
//! provider and store failures.
//!
//! # CORS
//!
//! `server.allowed_origins = ["*"]` (the default) permits every origin;
//! otherwise only the listed origins are allowed.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info};

use citerag_core::models::SourceChunk;
use citerag_core::pipeline::{restrict_to_documents, Pipeline};
use citerag_core::store::MetadataFilter;

use crate::config::{Config, IngestConfig};
use crate::error::is_client_error;
use crate::ingest::{index_batch, DocumentRegistry, IngestOutcome, RawDocument};
use crate::pipeline::build_pipeline;

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    ingest: Arc<IngestConfig>,
    documents: DocumentRegistry,
}

/// Builds the pipeline from `config` and serves until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config)?;
    let app = router(pipeline, config);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(addr = %config.server.bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// The service routes over an already-built pipeline.
pub fn router(pipeline: Pipeline, config: &Config) -> Router {
    let state = AppState {
        pipeline,
        ingest: Arc::new(config.ingest.clone()),
        documents: DocumentRegistry::new(),
    };

    Router::new()
        .route("/documents", post(handle_upload).get(handle_list_documents))
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(config.server.max_upload_mb * 1024 * 1024))
        .layer(cors_layer(&config.server.allowed_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

/// Caller mistakes become 400; everything else is a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        if is_client_error(&err) {
            return bad_request(message);
        }
        error!(error = %message, "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message,
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `"ok"`, or `"degraded"` when the vector store cannot be counted.
    status: &'static str,
    version: &'static str,
    records: Option<usize>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let records = state.pipeline.store().count().await.ok();
    Json(HealthResponse {
        status: if records.is_some() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        records,
    })
}

// ============ POST /documents ============

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub documents: Vec<UploadDocument>,
}

#[derive(Debug, Deserialize)]
pub struct UploadDocument {
    pub file_name: String,
    pub content: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl UploadDocument {
    fn into_raw(self) -> RawDocument {
        let doc = RawDocument::new(self.file_name, self.content.into_bytes());
        match self.content_type {
            Some(ct) => doc.with_content_type(ct),
            None => doc,
        }
    }
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.trim_start()
                .to_ascii_lowercase()
                .starts_with("multipart/form-data")
        })
}

/// Every part must be a file; its bytes are taken as-is.
async fn read_multipart(mut multipart: Multipart) -> Result<Vec<RawDocument>, AppError> {
    let mut documents = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            let name = field.name().unwrap_or_default().to_string();
            return Err(bad_request(format!("multipart field '{}' is not a file", name)));
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(e.body_text()))?;

        let doc = RawDocument::new(file_name, bytes.to_vec());
        documents.push(match content_type {
            Some(ct) => doc.with_content_type(ct),
            None => doc,
        });
    }
    Ok(documents)
}

async fn handle_upload(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<Vec<IngestOutcome>>, AppError> {
    let documents = if is_multipart(request.headers()) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| bad_request(e.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let Json(req) = Json::<UploadRequest>::from_request(request, &state)
            .await
            .map_err(|e| bad_request(e.body_text()))?;
        req.documents.into_iter().map(UploadDocument::into_raw).collect()
    };
    if documents.is_empty() {
        return Err(bad_request("documents must not be empty"));
    }

    let outcomes = index_batch(&state.pipeline, documents, &state.ingest).await?;
    state.documents.record(&outcomes);
    Ok(Json(outcomes))
}

// ============ GET/DELETE /documents ============

async fn handle_list_documents(State(state): State<AppState>) -> Json<Vec<IngestOutcome>> {
    Json(state.documents.list())
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IngestOutcome>, AppError> {
    state
        .documents
        .get(&id)
        .map(Json)
        .ok_or_else(|| not_found("Document not found"))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub id: String,
    pub deleted_records: usize,
}

/// 404 only when the id is neither registered nor present in the index.
async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted_records = state.pipeline.delete_document(&id).await?;
    let known = state.documents.remove(&id).is_some();
    if !known && deleted_records == 0 {
        return Err(not_found("Document not found"));
    }
    Ok(Json(DeleteResponse {
        id,
        deleted_records,
    }))
}

// ============ POST /query ============

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub doc_ids: Option<Vec<String>>,
    /// Metadata filter, e.g. `{"file_name": "a.txt"}` or
    /// `{"page": {"$in": [1, 2]}}`. `doc_ids` takes precedence over a
    /// `doc_id` key here.
    #[serde(default)]
    pub filter: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceChunk>,
    pub used_provider: String,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if req.top_k == Some(0) {
        return Err(bad_request("top_k must be >= 1"));
    }

    let base = match &req.filter {
        Some(raw) => {
            MetadataFilter::from_json(raw).map_err(|e| bad_request(format!("{:#}", e)))?
        }
        None => MetadataFilter::new(),
    };
    let filter = restrict_to_documents(base, req.doc_ids.as_deref().unwrap_or_default());
    let filter = (!filter.is_empty()).then_some(filter);

    let result = state
        .pipeline
        .query_filtered(&req.query, req.top_k, filter.as_ref())
        .await?;

    Ok(Json(QueryResponse {
        sources: result.sources(),
        answer: result.answer,
        used_provider: result.provider,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    async fn spawn(config: Config) -> String {
        let pipeline = build_pipeline(&config).unwrap();
        let app = router(pipeline, &config);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn upload_then_query() {
        let base = spawn(Config::testing()).await;
        let client = reqwest::Client::new();

        let outcomes: Value = client
            .post(format!("{}/documents", base))
            .json(&json!({"documents": [
                {"file_name": "colors.txt", "content": "Bananas are yellow. Apples are red."},
                {"file_name": "blank.txt", "content": ""}
            ]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(outcomes[0]["status"], "processed");
        assert_eq!(outcomes[0]["num_chunks"], 1);
        assert_eq!(outcomes[1]["status"], "failed");
        let doc_id = outcomes[0]["id"].as_str().unwrap().to_string();

        let resp = client
            .post(format!("{}/query", base))
            .json(&json!({"query": "What color are bananas?", "top_k": 3}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: QueryResponse = resp.json().await.unwrap();
        assert_eq!(body.used_provider, "fake");
        assert!(body.answer.starts_with("(fake) Based on context, I think: "));
        assert_eq!(body.sources.len(), 1);
        assert_eq!(body.sources[0].doc_id, doc_id);
        assert_eq!(body.sources[0].file_name, "colors.txt");
        assert_eq!(body.sources[0].chunk_id, 0);
        assert_eq!(body.sources[0].page, None);

        let health: Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["records"], 1);
    }

    #[tokio::test]
    async fn empty_query_is_bad_request() {
        let base = spawn(Config::testing()).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/query", base))
            .json(&json!({"query": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn oversized_upload_is_bad_request() {
        let mut config = Config::testing();
        config.ingest.max_docs_per_upload = 1;
        let base = spawn(config).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/documents", base))
            .json(&json!({"documents": [
                {"file_name": "a.txt", "content": "a"},
                {"file_name": "b.txt", "content": "b"}
            ]}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Max 1 documents"));
    }

    #[tokio::test]
    async fn unknown_doc_ids_yield_no_sources() {
        let base = spawn(Config::testing()).await;
        let client = reqwest::Client::new();
        client
            .post(format!("{}/documents", base))
            .json(&json!({"documents": [{"file_name": "a.txt", "content": "alpha"}]}))
            .send()
            .await
            .unwrap();
        let body: QueryResponse = client
            .post(format!("{}/query", base))
            .json(&json!({"query": "alpha?", "doc_ids": ["missing"]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(body.sources.is_empty());
    }

    fn docx_bytes(paragraph: &str) -> Vec<u8> {
        use std::io::Write;
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<w:document xmlns:w=\"w\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
                paragraph
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn multipart_upload_extracts_docx() {
        let base = spawn(Config::testing()).await;
        let client = reqwest::Client::new();

        let form = reqwest::multipart::Form::new()
            .part(
                "files",
                reqwest::multipart::Part::bytes(docx_bytes("Bananas are yellow."))
                    .file_name("fruit.docx")
                    .mime_str(crate::extract::MIME_DOCX)
                    .unwrap(),
            )
            .part(
                "files",
                reqwest::multipart::Part::bytes(b"Apples are red.".to_vec())
                    .file_name("apples.txt")
                    .mime_str("text/plain")
                    .unwrap(),
            );
        let resp = client
            .post(format!("{}/documents", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let outcomes: Vec<IngestOutcome> = resp.json().await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.is_processed()));
        assert_eq!(outcomes[0].file_name, "fruit.docx");
        assert_eq!(outcomes[0].content_type, crate::extract::MIME_DOCX);

        let only = vec![outcomes[0].id.clone()];
        let body: QueryResponse = client
            .post(format!("{}/query", base))
            .json(&json!({"query": "bananas?", "doc_ids": only}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.sources.len(), 1);
        assert_eq!(body.sources[0].snippet, "Bananas are yellow.");
    }

    #[tokio::test]
    async fn multipart_field_without_file_is_bad_request() {
        let base = spawn(Config::testing()).await;
        let form = reqwest::multipart::Form::new().text("note", "hello");
        let resp = reqwest::Client::new()
            .post(format!("{}/documents", base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"]["message"].as_str().unwrap().contains("not a file"));
    }

    #[tokio::test]
    async fn documents_are_listed_and_fetched() {
        let base = spawn(Config::testing()).await;
        let client = reqwest::Client::new();
        let outcomes: Vec<IngestOutcome> = client
            .post(format!("{}/documents", base))
            .json(&json!({"documents": [
                {"file_name": "a.txt", "content": "alpha"},
                {"file_name": "empty.txt", "content": ""}
            ]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let listed: Vec<IngestOutcome> = client
            .get(format!("{}/documents", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let names: Vec<&str> = listed.iter().map(|o| o.file_name.as_str()).collect();
        assert_eq!(names, vec!["empty.txt", "a.txt"]);

        let one: IngestOutcome = client
            .get(format!("{}/documents/{}", base, outcomes[1].id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(one.file_name, "empty.txt");
        assert_eq!(one.error.as_deref(), Some("Empty file"));

        let resp = client
            .get(format!("{}/documents/no-such-id", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_found");
        assert_eq!(body["error"]["message"], "Document not found");
    }

    #[tokio::test]
    async fn delete_removes_records_and_listing() {
        let base = spawn(Config::testing()).await;
        let client = reqwest::Client::new();
        let outcomes: Vec<IngestOutcome> = client
            .post(format!("{}/documents", base))
            .json(&json!({"documents": [{"file_name": "a.txt", "content": "alpha"}]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = outcomes[0].id.clone();

        let deleted: DeleteResponse = client
            .delete(format!("{}/documents/{}", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(deleted.id, id);
        assert_eq!(deleted.deleted_records, 1);

        let health: Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["records"], 0);

        let again = client
            .delete(format!("{}/documents/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), 404);
        let fetched = client
            .get(format!("{}/documents/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(fetched.status(), 404);
    }

    #[tokio::test]
    async fn query_filter_narrows_sources() {
        let base = spawn(Config::testing()).await;
        let client = reqwest::Client::new();
        client
            .post(format!("{}/documents", base))
            .json(&json!({"documents": [
                {"file_name": "a.txt", "content": "alpha notes"},
                {"file_name": "b.txt", "content": "beta notes"}
            ]}))
            .send()
            .await
            .unwrap();

        let body: QueryResponse = client
            .post(format!("{}/query", base))
            .json(&json!({"query": "notes", "filter": {"file_name": "b.txt"}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.sources.len(), 1);
        assert_eq!(body.sources[0].file_name, "b.txt");

        let body: QueryResponse = client
            .post(format!("{}/query", base))
            .json(&json!({"query": "notes", "filter": {"file_name": {"$in": ["a.txt", "b.txt"]}}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.sources.len(), 2);
    }

    #[tokio::test]
    async fn malformed_filter_is_bad_request() {
        let base = spawn(Config::testing()).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/query", base))
            .json(&json!({"query": "notes", "filter": {"page": {"$gt": 3}}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("malformed metadata filter"));
    }
}
