use actix_web::{HttpResponse, ResponseError};
use error_types::ServiceError;

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub ServiceError);

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let body = self.0.to_response();
        HttpResponse::build(
            actix_web::http::StatusCode::from_u16(body.status)
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
        )
        .json(body)
    }
}
