//! HTTP API for the file storage service.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /createTask` - Create or overwrite a task from an archive
//! - `POST /submit` - Store a solution as a new submission
//! - `POST /storeOutputs` - Store a submission's program outputs from an archive
//! - `GET /getTaskFiles` - Whole-task bundle
//! - `GET /getInputOutput` - Single input/output pair bundle
//! - `GET /getSolutionPackage` - Fixtures plus a submission's solution
//! - `GET /getUserSubmission` - A submission's solution file
//! - `GET /getTaskDescription` - The task's description PDF
//! - `DELETE /deleteTask` - Remove a task and its submissions

mod error;
mod routes;
mod tasks;

pub use error::ApiError;
pub use routes::{router, serve, AppState, HealthResponse};
pub use tasks::{CreateTaskResponse, MessageResponse, SubmitResponse};
