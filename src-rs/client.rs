//! HTTP client for the analysis API.
//!
//! One `multipart/form-data` POST per call, no retries. Every failure is
//! folded into [`Error::AnalysisFailed`] carrying the text shown to the user,
//! except malformed success bodies which surface as
//! [`Error::ResponseShapeInvalid`].

use std::io::Read;
use std::path::Path;

use log::{info, warn};
use rand::Rng;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::schema::{error_message, parse_success, AnalysisResult};

pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["dcm", "dicom", "rvg"];

const FILE_FIELD: &str = "file";

/// Anything that can turn an uploaded file into an analysis.
pub trait Analyze {
    fn analyze(&self, file_bytes: &[u8], file_name: &str) -> Result<AnalysisResult>;
}

pub struct AnalysisClient {
    endpoint: String,
    agent: ureq::Agent,
}

impl AnalysisClient {
    pub fn new(config: &ClientConfig) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.timeout_connect(timeout);
        }
        if let Some(timeout) = config.read_timeout {
            builder = builder.timeout_read(timeout);
        }
        Self {
            endpoint: config.endpoint.clone(),
            agent: builder.build(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Analyze for AnalysisClient {
    fn analyze(&self, file_bytes: &[u8], file_name: &str) -> Result<AnalysisResult> {
        let form = MultipartForm::single_file(FILE_FIELD, file_name, file_bytes);
        info!(
            "uploading {} ({} bytes) to {}",
            file_name,
            file_bytes.len(),
            self.endpoint
        );

        let outcome = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", &form.content_type())
            .set("Accept", "application/json")
            .send_bytes(&form.body);

        match outcome {
            Ok(response) => {
                let status = response.status();
                let body = read_body(response)?;
                if !(200..300).contains(&status) {
                    return Err(Error::AnalysisFailed(error_message(status, &body)));
                }
                let result = parse_success(&body)?;
                info!(
                    "analysis returned {} detections, {} image bytes",
                    result.detections.len(),
                    result.image_bytes.len()
                );
                Ok(result)
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = read_body(response).unwrap_or_default();
                let message = error_message(status, &body);
                warn!("analysis failed with status {status}: {message}");
                Err(Error::AnalysisFailed(message))
            }
            Err(ureq::Error::Transport(transport)) => {
                warn!("analysis request did not complete: {transport}");
                Err(Error::AnalysisFailed(transport.to_string()))
            }
        }
    }
}

/// A previously saved success body, analyzed offline.
pub struct SavedResponse {
    body: Vec<u8>,
}

impl SavedResponse {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body }
    }
}

impl Analyze for SavedResponse {
    fn analyze(&self, _file_bytes: &[u8], file_name: &str) -> Result<AnalysisResult> {
        info!("loading saved analysis from {file_name}");
        parse_success(&self.body)
    }
}

fn read_body(response: ureq::Response) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|err| Error::AnalysisFailed(format!("failed to read response body: {err}")))?;
    Ok(body)
}

/// Whether `path` carries one of the X-ray extensions the API expects.
/// Purely advisory: the bytes are uploaded regardless.
pub fn has_accepted_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
        .unwrap_or(false)
}

struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    fn single_file(field: &str, file_name: &str, bytes: &[u8]) -> Self {
        let boundary = format!(
            "----dental-analyze-{:016x}",
            rand::thread_rng().gen::<u64>()
        );
        let mut body = Vec::with_capacity(bytes.len() + 256);
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"{}\"\r\n",
                escape_filename(file_name)
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        Self { boundary, body }
    }

    fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }
}

fn escape_filename(name: &str) -> String {
    name.chars()
        .filter(|ch| !matches!(ch, '\r' | '\n'))
        .map(|ch| match ch {
            '"' => "%22".to_string(),
            other => other.to_string(),
        })
        .collect()
}
