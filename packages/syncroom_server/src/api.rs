use actix_web::{HttpResponse, Result, get, web::Json};
use serde_json::{Value, json};

#[get("/")]
pub async fn root_endpoint() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Syncroom server running. Ready for connections.")
}

#[get("/health")]
pub async fn health_endpoint() -> Result<Json<Value>> {
    log::trace!("Healthy");
    Ok(Json(json!({"healthy": true})))
}
