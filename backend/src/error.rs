use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

/// Everything that can go wrong while serving one classification request.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
    #[error("Missing file field '{0}' in upload")]
    MissingFile(&'static str),
    #[error("Uploaded file exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },
    #[error("Image dimensions exceed limits: {0}")]
    ImageTooLarge(String),
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Preprocessing error: {0}")]
    Preprocess(String),
    #[error("Model inference error: {0}")]
    Inference(String),
}

impl ClassifyError {
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<tch::TchError> for ClassifyError {
    fn from(err: tch::TchError) -> Self {
        ClassifyError::Inference(err.to_string())
    }
}

impl ResponseError for ClassifyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ClassifyError::InvalidUpload(_) | ClassifyError::MissingFile(_) => {
                StatusCode::BAD_REQUEST
            }
            ClassifyError::PayloadTooLarge { .. } | ClassifyError::ImageTooLarge(_) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ClassifyError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ClassifyError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ClassifyError::Preprocess(_) | ClassifyError::Inference(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_server_faults_are_split() {
        let cases = [
            (ClassifyError::InvalidUpload("eof".into()), 400),
            (ClassifyError::MissingFile("file"), 400),
            (ClassifyError::PayloadTooLarge { limit: 10 }, 413),
            (ClassifyError::ImageTooLarge("9000 x 9000".into()), 413),
            (ClassifyError::UnsupportedFormat("text".into()), 415),
            (ClassifyError::Decode("truncated".into()), 422),
            (ClassifyError::Preprocess("shape".into()), 500),
            (ClassifyError::Inference("oom".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{err}");
            assert_eq!(err.is_client_error(), status < 500);
        }
    }

    #[test]
    fn body_carries_the_message() {
        let resp = ClassifyError::MissingFile("file").error_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let content_type = resp.headers().get("content-type").unwrap();
        assert_eq!(content_type.to_str().unwrap(), "application/json");
    }
}
