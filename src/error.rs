use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gemini API error: {0}")]
    Gemini(String),

    #[error("upstream API error: {0}")]
    Upstream(String),

    #[error("upstream returned HTTP {0}")]
    NonOkStatus(u16),

    #[error("deploy refused: {0}")]
    StaleDeploy(String),
}
