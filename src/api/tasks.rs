//! Task, submission, and bundle endpoints.
//!
//! Handlers only parse the request and render the response; all storage work runs
//! on the blocking pool.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio_util::io::ReaderStream;

use super::error::ApiError;
use super::routes::AppState;
use crate::storage::{
    outputs_from_upload, task_files_from_upload, Bundle, StorageResult, StoredFile, StoredOutputs,
    TaskId, UserId,
};
use crate::util::{attachment, parse_flag, parse_positive_id};

type Params = HashMap<String, String>;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub message: String,
    pub replaced: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub message: String,
    pub submission_number: u32,
}

struct Upload {
    file_name: Option<String>,
    bytes: Bytes,
}

#[derive(Default)]
struct Form {
    fields: Params,
    files: HashMap<String, Upload>,
}

impl Form {
    fn file(&mut self, name: &str) -> Result<Upload, ApiError> {
        self.files
            .remove(name)
            .ok_or_else(|| ApiError::bad_request("Invalid request", format!("{} file is required", name)))
    }
}

async fn read_form(mut multipart: Multipart) -> Result<Form, ApiError> {
    let mut form = Form::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), "Invalid multipart body", e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::new(e.status(), "Failed to read upload", e.body_text()))?;
                form.files.insert(
                    name,
                    Upload {
                        file_name: Some(file_name),
                        bytes,
                    },
                );
            }
            None => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::new(e.status(), "Invalid form field", e.body_text()))?;
                form.fields.insert(name, text);
            }
        }
    }
    Ok(form)
}

fn id(params: &Params, key: &str) -> Result<u64, ApiError> {
    let raw = params
        .get(key)
        .ok_or_else(|| ApiError::bad_request("Invalid request", format!("{} is required", key)))?;
    parse_positive_id(key, raw).map_err(|details| {
        ApiError::bad_request("Invalid request", details).with(key, raw.as_str())
    })
}

fn submission_number(params: &Params) -> Result<u32, ApiError> {
    let n = id(params, "submissionNumber")?;
    u32::try_from(n).map_err(|_| {
        ApiError::bad_request("Invalid request", "submissionNumber is out of range")
            .with("submissionNumber", n)
    })
}

/// Run a storage call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<StorageResult<T>, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> StorageResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal("Storage worker failed", e.to_string()))
}

fn download(file: StoredFile, content_type: &'static str) -> Result<Response, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_DISPOSITION, disposition(&file.name)?);
    Ok((headers, file.contents).into_response())
}

fn disposition(name: &str) -> Result<HeaderValue, ApiError> {
    attachment(name).parse().map_err(|_| {
        ApiError::internal(
            "Failed to build response",
            format!("Filename produces an invalid header value: {}", name),
        )
    })
}

/// Build a bundle on the blocking pool and stream it. The temporary file is
/// unlinked as soon as the stream holds its own handle.
async fn stream_bundle<F>(reason: &'static str, context: Params, build: F) -> Result<Response, ApiError>
where
    F: FnOnce() -> StorageResult<Bundle> + Send + 'static,
{
    let opened = blocking(move || {
        let bundle = build()?;
        let file = bundle
            .open()
            .map_err(|e| crate::storage::StorageError::read(bundle.path(), e))?;
        Ok((file, bundle.download_name().to_string()))
    })
    .await?;

    let (file, name) = opened.map_err(|e| with_context(ApiError::storage(reason, &e), &context))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/gzip"));
    headers.insert(header::CONTENT_DISPOSITION, disposition(&name)?);

    let stream = ReaderStream::new(tokio::fs::File::from_std(file));
    Ok((headers, Body::from_stream(stream)).into_response())
}

fn with_context(mut err: ApiError, context: &Params) -> ApiError {
    for (k, v) in context {
        err = err.with(k, v.as_str());
    }
    err
}

fn context(params: &Params, keys: &[&str]) -> Params {
    keys.iter()
        .filter_map(|k| params.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<CreateTaskResponse>, ApiError> {
    let mut form = read_form(multipart).await?;
    let task = TaskId(id(&form.fields, "taskID")?);
    let raw_overwrite = form.fields.get("overwrite").cloned().unwrap_or_default();
    let overwrite = parse_flag(&raw_overwrite, false).ok_or_else(|| {
        ApiError::bad_request("Invalid request", "Invalid overwrite flag.")
            .with("overwrite", raw_overwrite.as_str())
    })?;
    let archive = form.file("archive")?;

    let result = blocking(move || {
        let files = task_files_from_upload(&archive.bytes, archive.file_name.as_deref())?;
        state.store.tasks.create_or_overwrite(task, &files, overwrite)
    })
    .await?;

    let outcome = result.map_err(|e| {
        ApiError::storage("Failed to create Task Directory", &e)
            .with("taskID", task.0)
            .with("overwrite", overwrite)
    })?;

    Ok(Json(CreateTaskResponse {
        message: "Task directory created successfully".to_string(),
        replaced: outcome.replaced,
    }))
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let mut form = read_form(multipart).await?;
    let task = TaskId(id(&form.fields, "taskID")?);
    let user = UserId(id(&form.fields, "userID")?);
    let upload = form.file("submissionFile")?;
    let file_name = upload.file_name.clone().unwrap_or_default();

    let result = blocking(move || {
        state
            .store
            .submissions
            .create_submission(task, user, &upload.bytes, &file_name)
    })
    .await?;

    let submission_number = result.map_err(|e| {
        ApiError::storage("Failed to create user submission", &e)
            .with("taskID", task.0)
            .with("userID", user.0)
    })?;

    Ok(Json(SubmitResponse {
        message: "Submission created successfully".to_string(),
        submission_number,
    }))
}

pub async fn store_outputs(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<MessageResponse>, ApiError> {
    let mut form = read_form(multipart).await?;
    let task = TaskId(id(&form.fields, "taskID")?);
    let user = UserId(id(&form.fields, "userID")?);
    let submission = submission_number(&form.fields)?;
    let archive = form.file("archive")?;

    let result = blocking(move || {
        let outputs = outputs_from_upload(&archive.bytes, archive.file_name.as_deref())?;
        state
            .store
            .submissions
            .store_outputs(task, user, submission, &outputs)
    })
    .await?;

    let stored = result.map_err(|e| {
        ApiError::storage("Failed to store user outputs", &e)
            .with("taskID", task.0)
            .with("userID", user.0)
            .with("submission", submission)
    })?;

    let message = match stored {
        StoredOutputs::CompileError => "Compile error stored successfully",
        StoredOutputs::Outputs { .. } => "User outputs stored successfully",
    };
    Ok(Json(MessageResponse {
        message: message.to_string(),
    }))
}

pub async fn get_task_files(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    let task = TaskId(id(&params, "taskID")?);
    stream_bundle(
        "Failed to get task files",
        context(&params, &["taskID"]),
        move || state.store.bundles.task_files(task),
    )
    .await
}

pub async fn get_input_output(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    let task = TaskId(id(&params, "taskID")?);
    let k = id(&params, "inputOutputID")?;
    let k = u32::try_from(k).map_err(|_| {
        ApiError::bad_request("Invalid request", "inputOutputID is out of range")
            .with("inputOutputID", k)
    })?;
    stream_bundle(
        "Failed to get input/output files",
        context(&params, &["taskID", "inputOutputID"]),
        move || state.store.bundles.input_output(task, k),
    )
    .await
}

pub async fn get_solution_package(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    let task = TaskId(id(&params, "taskID")?);
    let user = UserId(id(&params, "userID")?);
    let submission = submission_number(&params)?;
    stream_bundle(
        "Failed to get solution package",
        context(&params, &["taskID", "userID", "submissionNumber"]),
        move || state.store.bundles.solution_package(task, user, submission),
    )
    .await
}

pub async fn get_user_submission(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    let task = TaskId(id(&params, "taskID")?);
    let user = UserId(id(&params, "userID")?);
    let submission = submission_number(&params)?;

    let result = blocking(move || {
        state
            .store
            .submissions
            .get_submission_solution(task, user, submission)
    })
    .await?;
    let file = result.map_err(|e| {
        ApiError::storage("Failed to get user submission", &e)
            .with("taskID", task.0)
            .with("userID", user.0)
            .with("submission", submission)
    })?;
    download(file, "application/octet-stream")
}

pub async fn get_task_description(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    let task = TaskId(id(&params, "taskID")?);
    let result = blocking(move || state.store.tasks.description(task)).await?;
    let file = result.map_err(|e| {
        ApiError::storage("Failed to get task description", &e).with("taskID", task.0)
    })?;
    download(file, "application/pdf")
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Params>,
) -> Result<Json<MessageResponse>, ApiError> {
    let task = TaskId(id(&params, "taskID")?);
    let result = blocking(move || state.store.tasks.delete(task)).await?;
    result.map_err(|e| ApiError::storage("Failed to delete task", &e).with("taskID", task.0))?;
    Ok(Json(MessageResponse {
        message: "Task deleted successfully".to_string(),
    }))
}
