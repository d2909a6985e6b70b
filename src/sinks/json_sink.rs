use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::metric::MetricPoint;
use crate::sinks::Sink;
use log::{debug, warn};
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Writes every point as one line of JSON to any writer
///
/// Output is buffered; `flush` pushes it to the underlying writer. Each point
/// is serialized completely before anything is written, so a point that
/// fails to serialize writes nothing at all. An I/O error can still tear a
/// line: lines longer than the buffer go straight to the underlying writer,
/// and a write that fails halfway leaves the bytes already written behind.
pub struct JsonSink<W: Write + Send> {
    name: String,
    meta_as_tags: bool,
    writer: Option<BufWriter<W>>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(name: impl Into<String>, writer: W, config: &SinkConfig) -> Self {
        Self {
            name: name.into(),
            meta_as_tags: config.meta_as_tags,
            writer: Some(BufWriter::new(writer)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    fn writer(&mut self) -> Result<&mut BufWriter<W>, SinkError> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(SinkError::Closed {
                sink: self.name.clone(),
            }),
        }
    }
}

impl JsonSink<io::Stdout> {
    /// Sink printing to standard output
    pub fn stdout(name: impl Into<String>, config: &SinkConfig) -> Self {
        Self::new(name, io::stdout(), config)
    }
}

impl JsonSink<File> {
    /// Sink appending to a file, created if missing
    pub fn append_to(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        config: &SinkConfig,
    ) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        debug!("JSON sink appending to {}", path.as_ref().display());
        Ok(Self::new(name, file, config))
    }
}

impl<W: Write + Send> Sink for JsonSink<W> {
    fn write(&mut self, point: &MetricPoint) -> Result<(), SinkError> {
        let point = if self.meta_as_tags {
            Cow::Owned(point.meta_as_tags())
        } else {
            Cow::Borrowed(point)
        };

        let mut line = serde_json::to_vec(point.as_ref())?;
        line.push(b'\n');
        self.writer()?.write_all(&line)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer()?.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!("Sink '{}' failed to flush on close: {}", self.name, e);
            }
            debug!("Sink '{}' closed", self.name);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<W: Write + Send> Drop for JsonSink<W> {
    fn drop(&mut self) {
        self.close();
    }
}
