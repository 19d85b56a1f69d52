use serde::{Deserialize, Serialize};

/// Body of a successful `POST /classify`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassificationResponse {
    pub label: String,
    /// Top-1 probability, rounded to 4 decimal places.
    pub confidence: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}
