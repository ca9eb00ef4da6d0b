use crate::error::SinkError;
use crate::generate::ScoreResult;
use crate::session::Turn;

use serde::Serialize;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

/// The record emitted for a finished interview, keyed by phone number at
/// the sink.  Emission is at-least-once; a duplicate for the same call
/// must overwrite rather than duplicate on the sink side.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub phone: String,
    pub job_role: String,
    pub transcript: Vec<Turn>,
    pub score: Option<ScoreResult>,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

pub trait ResultSink: Send + Sync {
    fn persist(
        &self,
        record: &CandidateRecord,
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;

    /// Last resort for candidate data that could not be processed
    /// normally; retained for manual recovery.
    fn dead_letter(
        &self,
        record: &CandidateRecord,
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;
}

pub struct HttpResultSink {
    http_client: reqwest::Client,
    sink_url: String,
    dead_letter_dir: PathBuf,
}

impl HttpResultSink {
    pub fn new(http_client: reqwest::Client, sink_url: String, dead_letter_dir: String) -> Self {
        Self {
            http_client,
            sink_url,
            dead_letter_dir: PathBuf::from(dead_letter_dir),
        }
    }
}

impl ResultSink for HttpResultSink {
    async fn persist(&self, record: &CandidateRecord) -> Result<(), SinkError> {
        let resp = self
            .http_client
            .post(&self.sink_url)
            .json(record)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        debug!(phone=%record.phone, "candidate record persisted");
        Ok(())
    }

    async fn dead_letter(&self, record: &CandidateRecord) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.dead_letter_dir).await?;
        let name = format!("{}_{}.json", record.phone, Uuid::new_v4());
        let path = self.dead_letter_dir.join(name);
        let body = serde_json::to_vec_pretty(record).map_err(|e| {
            SinkError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        tokio::fs::write(&path, body).await?;
        info!(phone=%record.phone, path=%path.display(), "transcript written to dead-letter area");
        Ok(())
    }
}
