use anyhow::{Context, anyhow};
use log::info;
use rocket::form::{Errors, Form, FromForm};
use rocket::fs::TempFile;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, post, routes};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

use crate::api::{AppError, AppResult};
use crate::config::AppConfig;
use crate::models::UploadedFile;
use crate::workflow::BatchCoordinator;

#[derive(FromForm, Debug)]
pub struct UploadForm<'r> {
    /// Photos in upload order
    #[field(name = "photos")]
    pub files: Vec<TempFile<'r>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub result_id: String,
    pub file_count: usize,
}

fn get_filename(file: &TempFile<'_>) -> String {
    file.raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default()
}

#[post("/api/upload", data = "<form>")]
pub async fn upload(
    config: &State<AppConfig>,
    coordinator: &State<BatchCoordinator>,
    form: Result<Form<UploadForm<'_>>, Errors<'_>>,
) -> AppResult<Json<UploadResponse>> {
    let mut inner_form = match form {
        Ok(form) => form.into_inner(),
        Err(errors) => {
            let error_chain = errors
                .iter()
                .map(|e| anyhow!(e.to_string()))
                .reduce(|acc, e| acc.context(e.to_string()));

            let error = match error_chain {
                Some(chain) => chain.context("Failed to parse form"),
                None => anyhow!("Failed to parse form with unknown error"),
            };
            return Err(AppError::new(Status::BadRequest, error));
        }
    };

    let start_time = Instant::now();
    let mut uploads = Vec::with_capacity(inner_form.files.len());
    for file in inner_form.files.iter_mut() {
        // The handle exists before the copy, so a failed copy is cleaned up too.
        let upload = UploadedFile::new(
            get_filename(file),
            config.upload_dir.join(format!("{}.upload", Uuid::new_v4())),
        );
        file.move_copy_to(upload.path())
            .await
            .with_context(|| format!("Failed to save upload '{}'", upload.original_name()))?;
        uploads.push(upload);
    }
    info!(duration = &*format!("{:?}", start_time.elapsed());
        "Received {} upload(s)",
        uploads.len()
    );

    let record = coordinator
        .submit(uploads)
        .await
        .map_err(AppError::from_batch)?;

    Ok(Json(UploadResponse {
        message: "Upload processed".to_string(),
        result_id: record.id,
        file_count: record.file_count,
    }))
}

pub fn generate_upload_routes() -> Vec<rocket::Route> {
    routes![upload]
}
