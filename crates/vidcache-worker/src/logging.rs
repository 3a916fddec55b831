//! Log context for one transcode or image batch.
//!
//! Lines are emitted with `job_key`, `job_id` and `operation` fields; filter
//! on `job_id` to follow a single job.

use tracing::Span;
use vidcache_models::JobKey;

macro_rules! job_event {
    ($level:ident, $logger:expr, $phase:expr, $message:expr) => {
        tracing::$level!(
            job_key = %$logger.key,
            job_id = %$logger.id,
            operation = $logger.operation,
            "{}: {}",
            $phase,
            $message
        )
    };
}

#[derive(Debug, Clone)]
pub struct JobLogger {
    key: String,
    id: String,
    operation: &'static str,
}

impl JobLogger {
    pub fn new(key: &JobKey, job_id: &str, operation: &'static str) -> Self {
        Self {
            key: key.to_string(),
            id: job_id.to_string(),
            operation,
        }
    }

    /// Image batches have no job key; the destination stands in for the id.
    pub fn for_batch(destination: &str, operation: &'static str) -> Self {
        Self {
            key: String::new(),
            id: destination.to_string(),
            operation,
        }
    }

    pub fn log_start(&self, message: &str) {
        job_event!(info, self, "Started", message);
    }

    pub fn log_progress(&self, message: &str) {
        job_event!(info, self, "Progress", message);
    }

    pub fn log_warning(&self, message: &str) {
        job_event!(warn, self, "Warning", message);
    }

    pub fn log_error(&self, message: &str) {
        job_event!(error, self, "Error", message);
    }

    pub fn log_completion(&self, message: &str) {
        job_event!(info, self, "Done", message);
    }

    /// Instruments a whole job future.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_key = %self.key,
            job_id = %self.id,
            operation = self.operation
        )
    }
}
