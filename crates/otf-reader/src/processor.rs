//! Per-file processing: records in, envelopes out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use otf_core::{Envelope, InputFormat, Meta};

use crate::broker::Broker;
use crate::error::ProcessError;
use crate::publisher::Publisher;
use crate::stats::PipelineStats;
use crate::transform::RecordStream;

/// What happened to one file.
#[derive(Debug)]
pub struct FileReport {
    /// The processed file.
    pub path: Utf8PathBuf,
    /// Records enqueued before the file finished or failed.
    pub published: u64,
    /// Wall time spent on the file.
    pub elapsed: Duration,
    /// Why processing stopped early, if it did.
    pub error: Option<ProcessError>,
}

impl FileReport {
    /// Returns `true` if every record of the file was enqueued.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Logs the outcome.
    pub fn log(&self) {
        let elapsed_ms = u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX);
        match &self.error {
            None => tracing::info!(
                path = %self.path,
                records = self.published,
                elapsed_ms,
                "{} records published from {}",
                self.published,
                self.path
            ),
            Some(error) => {
                tracing::error!(
                    path = %self.path,
                    error = %error,
                    elapsed_ms,
                    "File processing aborted"
                );
                if self.published > 0 {
                    tracing::warn!(
                        path = %self.path,
                        records = self.published,
                        "Partial publication: records already sent are not rolled back"
                    );
                }
            }
        }
    }
}

/// Turns a file into envelopes and publishes them in file order.
#[derive(Debug)]
pub struct FileProcessor<B> {
    publisher: Publisher<B>,
    meta: Arc<Meta>,
    format: InputFormat,
    stats: Arc<PipelineStats>,
}

impl<B: Broker> FileProcessor<B> {
    /// Creates a processor stamping `meta` on every record.
    pub fn new(
        publisher: Publisher<B>,
        meta: Meta,
        format: InputFormat,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            publisher,
            meta: Arc::new(meta),
            format,
            stats,
        }
    }

    /// Processes one file to completion or to its first error.
    ///
    /// The first failing record stops the file; later records are not
    /// attempted.
    pub async fn process(&self, path: &Utf8Path) -> FileReport {
        let started = Instant::now();
        let mut published = 0;
        let result = self.publish_records(path, &mut published).await;

        match result {
            Ok(()) => self.stats.file_completed(),
            Err(_) => self.stats.file_failed(),
        }
        FileReport {
            path: path.to_owned(),
            published,
            elapsed: started.elapsed(),
            error: result.err(),
        }
    }

    async fn publish_records(&self, path: &Utf8Path, published: &mut u64) -> Result<(), ProcessError> {
        let mut records = RecordStream::open(path, self.format);
        while let Some(record) = records.next().await {
            let envelope = Envelope::new(record?, Arc::clone(&self.meta));
            let message_id = self.publisher.publish(&envelope).await?;
            tracing::trace!(
                path = %path,
                topic = self.publisher.topic(),
                message_id,
                "Record enqueued"
            );
            *published += 1;
        }
        Ok(())
    }
}
