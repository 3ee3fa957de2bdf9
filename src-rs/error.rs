use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure that can reach the single message slot of a session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Please select a file first.")]
    NoFileSelected,

    /// Message is shown to the user verbatim.
    #[error("{0}")]
    AnalysisFailed(String),

    #[error("Failed to load the analysis image.")]
    ImageDecodeFailed,

    #[error("analysis response has an invalid shape: {0}")]
    ResponseShapeInvalid(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoFileSelected => "no_file_selected",
            Error::AnalysisFailed(_) => "analysis_failed",
            Error::ImageDecodeFailed => "image_decode_failed",
            Error::ResponseShapeInvalid(_) => "response_shape_invalid",
            Error::InvalidArgument(_) => "invalid_argument",
        }
    }
}
