use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use sha2::{Digest, Sha256};
use shared::ClassificationResponse;
use uuid::Uuid;

use crate::error::ClassifyError;
use crate::inference::postprocess::Prediction;
use crate::inference::{classify_bytes, Classifier};

pub const FILE_FIELD: &str = "file";

/// Maximum accepted size of the uploaded file, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimit(pub usize);

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/classify").route(web::post().to(handle_classify)));
}

fn image_digest(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

/// Buffers the first non-empty `file` field. Other fields are drained and dropped.
async fn read_file_field(payload: &mut Multipart, limit: usize) -> Result<Vec<u8>, ClassifyError> {
    let mut image_data: Option<Vec<u8>> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ClassifyError::InvalidUpload(e.to_string()))?
    {
        let wanted = image_data.is_none() && field.name() == Some(FILE_FIELD);
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ClassifyError::InvalidUpload(e.to_string()))?;
            if !wanted {
                continue;
            }
            if data.len() + chunk.len() > limit {
                return Err(ClassifyError::PayloadTooLarge { limit });
            }
            data.extend_from_slice(&chunk);
        }
        if wanted && !data.is_empty() {
            image_data = Some(data);
        }
    }

    image_data.ok_or(ClassifyError::MissingFile(FILE_FIELD))
}

async fn classify_upload(
    classifier: web::Data<dyn Classifier>,
    limit: UploadLimit,
    payload: &mut Multipart,
    request_id: Uuid,
) -> Result<Prediction, ClassifyError> {
    let image_data = read_file_field(payload, limit.0).await?;
    info!(
        "[{}] Received {} bytes (sha256 {})",
        request_id,
        image_data.len(),
        &image_digest(&image_data)[..12]
    );

    let classifier = classifier.into_inner();
    web::block(move || classify_bytes(classifier.as_ref(), &image_data))
        .await
        .map_err(|e| ClassifyError::Inference(format!("inference worker failed: {}", e)))?
}

async fn handle_classify(
    classifier: web::Data<dyn Classifier>,
    limit: web::Data<UploadLimit>,
    mut payload: Multipart,
) -> Result<HttpResponse, ClassifyError> {
    let request_id = Uuid::new_v4();

    match classify_upload(classifier, **limit, &mut payload, request_id).await {
        Ok(prediction) => {
            info!(
                "[{}] Classified as: {} (class {}, {})",
                request_id, prediction.label, prediction.index, prediction.confidence
            );
            Ok(HttpResponse::Ok().json(ClassificationResponse {
                label: prediction.label,
                confidence: prediction.confidence,
            }))
        }
        Err(e) => {
            if e.is_client_error() {
                warn!("[{}] Rejected upload: {}", request_id, e);
            } else {
                error!("[{}] Classifier error: {}", request_id, e);
            }
            Err(e)
        }
    }
}
