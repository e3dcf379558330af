//! Line-oriented client that writes every record as one JSON object.
//!
//! Useful for local runs and for piping the batcher into another process.
//! Every record in a call is reported delivered unless the write itself fails.

use std::io::{self, Write};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::errors::DeliveryError;
use crate::record::Record;
use crate::sink::{PutRecordsClient, PutRecordsOutput};

#[derive(Serialize)]
struct Line<'a> {
    key: &'a str,
    payload: String,
}

/// Writes records as newline-delimited JSON to any writer.
///
/// Lines are rendered before the writer lock is taken and written with a single
/// `write_all`, so concurrent calls never interleave. The write itself is
/// blocking: this client is meant for debugging and piping, not for a writer
/// that can stall.
pub struct WriterClient<W> {
    writer: Mutex<W>,
}

pub type StdoutClient = WriterClient<io::Stdout>;

impl StdoutClient {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> WriterClient<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_records(&self, records: &[Record]) -> io::Result<()> {
        let buf = render(records)?;
        let mut writer = self.writer.lock();
        writer.write_all(&buf)?;
        writer.flush()
    }
}

fn render(records: &[Record]) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    for record in records {
        let line = Line {
            key: &record.key,
            payload: String::from_utf8_lossy(&record.payload).into_owned(),
        };
        serde_json::to_writer(&mut buf, &line)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

#[async_trait]
impl<W: Write + Send> PutRecordsClient for WriterClient<W> {
    async fn put_records(&self, records: &[Record]) -> Result<PutRecordsOutput, DeliveryError> {
        self.write_records(records)
            .map_err(|e| DeliveryError::Transport {
                reason: e.to_string(),
            })?;
        Ok(PutRecordsOutput::all_delivered(records.len()))
    }
}
