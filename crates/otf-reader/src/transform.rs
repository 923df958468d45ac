//! Record transformation: input files to a lazy sequence of raw JSON records.
//!
//! # Formats
//!
//! - **json**: the file must be a JSON array. It is read incrementally; only
//!   the current element is held in memory.
//! - **csv**: the whole file is converted to JSON array text first, one
//!   object per row with header names as keys and string values in column
//!   order. Any conversion error fails the whole file before a record is
//!   emitted.
//!
//! Parsing runs on a blocking thread and hands records over a bounded
//! channel, so a slow publisher applies backpressure to the reader.

use std::cell::Cell;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};

use camino::Utf8PathBuf;
use csv::StringRecord;
use otf_core::InputFormat;
use serde::de::{SeqAccess, Visitor};
use serde::{Deserializer as _, Serialize, Serializer};
use serde_json::value::RawValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TransformError;

/// Records buffered between the parser thread and the consumer.
const RECORD_CHANNEL_CAPACITY: usize = 64;

/// One array element, byte-for-byte as it appeared in the input.
pub type RawRecord = Box<RawValue>;

type RecordSender = mpsc::Sender<Result<RawRecord, TransformError>>;

/// A finite, non-restartable sequence of records from one input.
///
/// Yields `Ok` records in input order. At most one `Err` is yielded, after
/// which the sequence ends. Dropping the stream stops the parser.
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<Result<RawRecord, TransformError>>,
    parser: Option<JoinHandle<()>>,
}

impl RecordStream {
    /// Opens `path` and starts parsing it as `format`.
    ///
    /// Failing to open the file is reported as the first item.
    #[must_use]
    pub fn open(path: impl Into<Utf8PathBuf>, format: InputFormat) -> Self {
        let path = path.into();
        Self::spawn(move |tx| {
            let file = File::open(&path).map_err(|source| TransformError::Open {
                path: path.clone(),
                source,
            })?;
            parse_reader(file, format, tx)
        })
    }

    /// Parses an in-memory or otherwise already opened input.
    #[must_use]
    pub fn from_reader<R: Read + Send + 'static>(reader: R, format: InputFormat) -> Self {
        Self::spawn(move |tx| parse_reader(reader, format, tx))
    }

    fn spawn<F>(parse: F) -> Self
    where
        F: FnOnce(&RecordSender) -> Result<(), TransformError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let parser = tokio::task::spawn_blocking(move || {
            if let Err(err) = parse(&tx) {
                let _ = tx.blocking_send(Err(err));
            }
        });
        Self {
            rx,
            parser: Some(parser),
        }
    }

    /// Returns the next record, or `None` once the input is exhausted.
    pub async fn next(&mut self) -> Option<Result<RawRecord, TransformError>> {
        if let Some(item) = self.rx.recv().await {
            return Some(item);
        }
        let parser = self.parser.take()?;
        match parser.await {
            Ok(()) => None,
            Err(_) => Some(Err(TransformError::ParserStopped)),
        }
    }
}

fn parse_reader<R: Read>(
    reader: R,
    format: InputFormat,
    tx: &RecordSender,
) -> Result<(), TransformError> {
    match format {
        InputFormat::Json => stream_json_array(BufReader::new(reader), tx),
        InputFormat::Csv => {
            let json = csv_to_json_array(reader)?;
            stream_json_array(Cursor::new(json), tx)
        }
    }
}

/// Converts CSV with a header row into JSON array text.
///
/// Every row becomes an object whose keys are the header names, in header
/// order, and whose values are the raw cell strings.
///
/// # Errors
///
/// Returns [`TransformError::Csv`] on unreadable or ragged input.
pub fn csv_to_json_array<R: Read>(reader: R) -> Result<Vec<u8>, TransformError> {
    let mut rdr = csv::ReaderBuilder::new().from_reader(reader);
    let headers = rdr.headers()?.clone();
    let rows = rdr.records().collect::<Result<Vec<_>, _>>()?;
    Ok(serde_json::to_vec(&Table {
        headers: &headers,
        rows: &rows,
    })?)
}

struct Table<'a> {
    headers: &'a StringRecord,
    rows: &'a [StringRecord],
}

impl Serialize for Table<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rows.iter().map(|row| Row {
            headers: self.headers,
            row,
        }))
    }
}

struct Row<'a> {
    headers: &'a StringRecord,
    row: &'a StringRecord,
}

impl Serialize for Row<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.headers.iter().zip(self.row.iter()))
    }
}

fn stream_json_array<R: BufRead>(mut reader: R, tx: &RecordSender) -> Result<(), TransformError> {
    expect_array_start(&mut reader)?;

    let stopped = Cell::new(false);
    let mut de = serde_json::Deserializer::from_reader(reader);
    match (&mut de).deserialize_seq(ElementSender {
        tx,
        stopped: &stopped,
    }) {
        Ok(()) => Ok(()),
        Err(_) if stopped.get() => Ok(()),
        Err(err) if err.is_io() => Err(TransformError::Read(err.into())),
        Err(err) => Err(TransformError::Decode(err)),
    }
}

/// Skips leading whitespace and checks the next byte opens an array.
///
/// The `[` itself is left in the reader.
fn expect_array_start<R: BufRead>(reader: &mut R) -> Result<(), TransformError> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Err(TransformError::MalformedInput(
                "empty input, expected a JSON array".to_owned(),
            ));
        }
        let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        let Some(&first) = buf.get(skip) else {
            let len = buf.len();
            reader.consume(len);
            continue;
        };
        reader.consume(skip);
        return if first == b'[' {
            Ok(())
        } else {
            Err(TransformError::MalformedInput(format!(
                "expected '[' at start of input, found '{}'",
                char::from(first).escape_default()
            )))
        };
    }
}

struct ElementSender<'a> {
    tx: &'a RecordSender,
    stopped: &'a Cell<bool>,
}

impl<'de> Visitor<'de> for ElementSender<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON array of records")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        while let Some(record) = seq.next_element::<RawRecord>()? {
            if self.tx.blocking_send(Ok(record)).is_err() {
                // Consumer went away; the rest of the input is never read.
                self.stopped.set(true);
                return Ok(());
            }
        }
        Ok(())
    }
}
