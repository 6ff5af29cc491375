//! Built-in message publishers.

use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::info;

use super::MessagePublisher;
use crate::error::PublishError;

/// Emits every document as an `info` event on the `results` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

impl MessagePublisher for LogPublisher {
    fn publish(&self, message: &str) -> Result<(), PublishError> {
        info!(target: "results", "{message}");
        Ok(())
    }
}

/// Appends one document per line to a file.
#[derive(Debug)]
pub struct FilePublisher {
    writer: Mutex<LineWriter<File>>,
}

impl FilePublisher {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> Result<Self, PublishError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(LineWriter::new(file)),
        })
    }
}

impl MessagePublisher for FilePublisher {
    fn publish(&self, message: &str) -> Result<(), PublishError> {
        let mut writer = self.writer.lock();
        writeln!(writer, "{message}")?;
        writer.flush()?;
        Ok(())
    }
}
