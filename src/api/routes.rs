//! HTTP route definitions and server startup.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use super::tasks;
use crate::config::Config;
use crate::storage::TaskStore;

/// Shared state for all handlers.
pub struct AppState {
    pub config: Config,
    pub store: TaskStore,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let task_uploads = Router::new()
        .route("/createTask", post(tasks::create_task))
        .layer(DefaultBodyLimit::max(state.config.task_upload_limit));

    let submission_uploads = Router::new()
        .route("/submit", post(tasks::submit))
        .route("/storeOutputs", post(tasks::store_outputs))
        .layer(DefaultBodyLimit::max(state.config.submission_upload_limit));

    let downloads = Router::new()
        .route("/health", get(health))
        .route("/getTaskFiles", get(tasks::get_task_files))
        .route("/getInputOutput", get(tasks::get_input_output))
        .route("/getSolutionPackage", get(tasks::get_solution_package))
        .route("/getUserSubmission", get(tasks::get_user_submission))
        .route("/getTaskDescription", get(tasks::get_task_description))
        .route("/deleteTask", delete(tasks::delete_task));

    Router::new()
        .merge(task_uploads)
        .merge(submission_uploads)
        .merge(downloads)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = TaskStore::open(&config)?;
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
    });
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for SIGINT/SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining in-flight requests");
}

async fn health(State(_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::archive_fixtures::{build_tar_gz, build_zip, read_tar_gz};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    const BOUNDARY: &str = "XBOUNDARYX";

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a [u8]),
    }

    fn multipart(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                            .as_bytes(),
                    );
                }
                Part::File(name, file_name, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                    body.extend_from_slice(b"\r\n");
                }
            }
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn post_form(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart(parts)))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn app(root: &std::path::Path) -> Router {
        let config = Config::new(root);
        let store = TaskStore::open(&config).expect("open");
        router(Arc::new(AppState { config, store }))
    }

    fn task_archive() -> Vec<u8> {
        build_tar_gz(&[
            ("sum/description.pdf", b"%PDF"),
            ("sum/input/1.in", b"1 1"),
            ("sum/input/2.in", b"2 2"),
            ("sum/output/1.out", b"2"),
            ("sum/output/2.out", b"4"),
        ])
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create_task(app: &Router, overwrite: &str) -> axum::response::Response {
        let archive = task_archive();
        app.clone()
            .oneshot(post_form(
                "/createTask",
                &[
                    Part::Text("taskID", "1"),
                    Part::Text("overwrite", overwrite),
                    Part::File("archive", "sum.tar.gz", &archive),
                ],
            ))
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_then_conflict() {
        let root = tempfile::tempdir().expect("tempdir");
        let app = app(root.path());

        let response = create_task(&app, "false").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = create_task(&app, "false").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json(response).await;
        assert_eq!(body["reason"], "Failed to create Task Directory");
        assert_eq!(body["context"]["taskID"], 1);

        let response = create_task(&app, "true").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["replaced"], true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submit_store_outputs_and_download() {
        let root = tempfile::tempdir().expect("tempdir");
        let app = app(root.path());
        assert_eq!(create_task(&app, "").await.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(post_form(
                "/submit",
                &[
                    Part::Text("taskID", "1"),
                    Part::Text("userID", "7"),
                    Part::File("submissionFile", "main.py", b"print(2)"),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["submissionNumber"], 1);

        let outputs = build_zip(&[("user-output/1.out", b"2"), ("user-output/2.out", b"4")]);
        let response = app
            .clone()
            .oneshot(post_form(
                "/storeOutputs",
                &[
                    Part::Text("taskID", "1"),
                    Part::Text("userID", "7"),
                    Part::Text("submissionNumber", "1"),
                    Part::File("archive", "outputs.zip", &outputs),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get("/getSolutionPackage?taskID=1&userID=7&submissionNumber=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/gzip");
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"Task1_User7_Submission1_Package.tar.gz\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let entries = read_tar_gz(&bytes);
        assert_eq!(entries["Task/solution.py"], Some(b"print(2)".to_vec()));

        let response = app
            .clone()
            .oneshot(get("/getUserSubmission?taskID=1&userID=7&submissionNumber=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"print(2)");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn downloads_and_delete() {
        let root = tempfile::tempdir().expect("tempdir");
        let app = app(root.path());
        assert_eq!(create_task(&app, "").await.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get("/getInputOutput?taskID=1&inputOutputID=2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let names: Vec<_> = read_tar_gz(&bytes).into_keys().collect();
        assert_eq!(names, vec!["2.in", "2.out"]);

        let response = app
            .clone()
            .oneshot(get("/getTaskDescription?taskID=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/pdf");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/deleteTask?taskID=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get("/getTaskFiles?taskID=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ids_must_be_positive() {
        let root = tempfile::tempdir().expect("tempdir");
        let app = app(root.path());

        let response = app
            .clone()
            .oneshot(get("/getTaskFiles?taskID=0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["context"]["taskID"], "0");

        let response = app.oneshot(get("/getTaskFiles")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn health_reports_ok() {
        let root = tempfile::tempdir().expect("tempdir");
        let response = app(root.path()).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "ok");
    }
}
