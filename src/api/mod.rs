pub mod handlers;

use crate::common::errors::{BatchError, StoreError};
use crate::config::AppConfig;
use crate::workflow::BatchCoordinator;
use rocket::data::{Limits, ToByteUnit};
use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::{Build, Rocket};
use serde_json::json;
use std::io::Cursor;

use handlers::results::generate_result_routes;
use handlers::upload::generate_upload_routes;

#[derive(Debug)]
pub struct AppError {
    pub status: Status,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn new(status: Status, error: impl Into<anyhow::Error>) -> Self {
        AppError {
            status,
            error: error.into(),
        }
    }

    /// Rejected batches are the client's fault; every other batch failure is ours.
    pub fn from_batch(err: BatchError) -> Self {
        let status = if err.is_rejection() {
            Status::BadRequest
        } else {
            Status::InternalServerError
        };
        AppError::new(status, err)
    }

    pub fn from_store(err: StoreError) -> Self {
        let status = if err.is_not_found() {
            Status::NotFound
        } else {
            Status::InternalServerError
        };
        AppError::new(status, err)
    }
}

#[rocket::async_trait]
impl<'r, 'o: 'r> Responder<'r, 'o> for AppError {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'o> {
        let outer_msg = self.error.to_string();

        let chain: Vec<String> = self.error.chain().map(|e| e.to_string()).collect();

        let body = json!({
            "error": outer_msg,
            "chain": chain,
        })
        .to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl<E> From<E> for AppError
where
    anyhow::Error: From<E>,
{
    fn from(err: E) -> Self {
        AppError {
            status: Status::InternalServerError,
            error: anyhow::Error::from(err),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Assemble the server: bind address, upload limits and temp dir from `config`,
/// shared pipeline state, and every route.
pub fn build_rocket(config: &AppConfig) -> Rocket<Build> {
    let upload_limit = config.upload_limit_mb.mebibytes();
    let limits = Limits::default()
        .limit("data-form", upload_limit)
        .limit("file", upload_limit);

    let figment = rocket::Config::figment()
        .merge(("address", config.address.clone()))
        .merge(("port", config.port))
        .merge(("temp_dir", config.upload_dir.clone()))
        .merge(("limits", limits));

    let coordinator = BatchCoordinator::from_config(config);
    let store = coordinator.store().clone();

    rocket::custom(figment)
        .manage(coordinator)
        .manage(store)
        .manage(config.clone())
        .mount("/", generate_upload_routes())
        .mount("/", generate_result_routes())
}
