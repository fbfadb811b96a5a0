use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use coursecast_core::CourseError;
use serde_json::json;
use tracing::error;

/// JSON error reply: `{"error": message}` with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<CourseError> for ApiError {
    fn from(err: CourseError) -> Self {
        match err {
            CourseError::NotFound(message) => Self::not_found(message),
            CourseError::SessionConflict(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            err if err.is_client_error() => Self::bad_request(err.to_string()),
            err => {
                error!("Request failed: {}", err);
                Self::internal(err.to_string())
            }
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        CourseError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_course_errors_map_to_status() {
        let cases = [
            (CourseError::ValidationError("topic".into()), StatusCode::BAD_REQUEST),
            (CourseError::NotFound("course".into()), StatusCode::NOT_FOUND),
            (CourseError::SessionConflict("s1".into()), StatusCode::CONFLICT),
            (CourseError::TtsError("engine".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_not_found_keeps_message() {
        let err = ApiError::from(CourseError::NotFound("Course abc".into()));
        assert_eq!(err.message, "Course abc");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
