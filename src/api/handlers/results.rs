use anyhow::anyhow;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, routes};

use crate::api::{AppError, AppResult};
use crate::models::{RecordSummary, ResultRecord};
use crate::store::ResultStore;

#[get("/api/results")]
pub async fn list_results(store: &State<ResultStore>) -> AppResult<Json<Vec<RecordSummary>>> {
    let summaries = store.list().await.map_err(AppError::from_store)?;
    Ok(Json(summaries))
}

/// `sort=captured` orders the items by capture time; the stored order is upload order.
#[get("/api/results/<id>?<sort>")]
pub async fn get_result(
    store: &State<ResultStore>,
    id: &str,
    sort: Option<&str>,
) -> AppResult<Json<ResultRecord>> {
    let record = store.get(id).await.map_err(AppError::from_store)?;
    match sort {
        None => Ok(Json(record)),
        Some("captured") => Ok(Json(record.sorted_by_capture_time())),
        Some(other) => Err(AppError::new(
            Status::BadRequest,
            anyhow!("Unsupported sort order: {}", other),
        )),
    }
}

#[delete("/api/results/<id>")]
pub async fn delete_result(store: &State<ResultStore>, id: &str) -> AppResult<Status> {
    store.delete(id).await.map_err(AppError::from_store)?;
    Ok(Status::NoContent)
}

pub fn generate_result_routes() -> Vec<rocket::Route> {
    routes![list_results, get_result, delete_result]
}
