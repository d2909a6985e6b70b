/// Sink writing one JSON object per point
pub mod json_sink;

pub use json_sink::JsonSink;

use crate::error::SinkError;
use crate::metric::MetricPoint;

/// Consumer of metric points with an explicit open/close lifecycle
///
/// A failed `write` must leave the sink usable for the next call. `flush`
/// blocks until buffered points reached their destination or reports why
/// they did not. `close` releases all resources and may be called more than
/// once. `name` is used to attribute errors to the sink.
#[cfg_attr(test, mockall::automock)]
pub trait Sink: Send {
    fn write(&mut self, point: &MetricPoint) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError>;

    fn close(&mut self);

    fn name(&self) -> &str;
}
