use crate::domain::session::SessionView;
use crate::error::Result;
use std::io::Write;

/// Writes rendered session views as CSV records.
///
/// The header `state,elapsed_seconds,poll_count,message,receipt_reference` is
/// emitted before the first record. Each record is flushed immediately so a
/// reader sees progress while the session is still pending.
pub struct SessionWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> SessionWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_view(&mut self, view: &SessionView) -> Result<()> {
        self.writer.serialize(view)?;
        self.writer.flush()?;
        Ok(())
    }
}
