//! Streaming reader over a classic pcap file.

use std::fs::File;
use std::io::{self, Chain, Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError};
use tracing::{debug, trace};

use super::decode::{decode_packet, LinkType, Packet};
use crate::error::{CaptureError, Error, Result};
use crate::types::Timestamp;

/// Read buffer size. Must hold the largest single record.
const READ_BUFFER_SIZE: usize = 1 << 20;

/// Size of the classic pcap global header.
const GLOBAL_HEADER_LEN: usize = 24;

/// Counts the bytes handed to the pcap reader, so a refill that made no
/// progress can be told apart from one that did.
struct CountingReader<R> {
    inner: R,
    read: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

type Input<R> = CountingReader<Chain<Cursor<[u8; GLOBAL_HEADER_LEN]>, R>>;

/// Lazy, finite, non-restartable sequence of TCP segments in file order.
///
/// Frames that are not TCP over IP are skipped. The first truncated or
/// malformed record ends the sequence with an error; nothing is yielded
/// after it.
pub struct PacketSource<R: Read> {
    reader: LegacyPcapReader<Input<R>>,
    bytes_read: Arc<AtomicU64>,
    link: LinkType,
    nanosecond_precision: bool,
    records: u64,
    skipped: u64,
    finished: bool,
}

impl PacketSource<File> {
    /// Open a capture file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(file)
    }
}

impl<R: Read> PacketSource<R> {
    /// Create a source and read the global header.
    ///
    /// The input may hand out data in chunks of any size.
    pub fn new(input: R) -> Result<Self> {
        Self::with_buffer(input, READ_BUFFER_SIZE)
    }

    fn with_buffer(mut input: R, capacity: usize) -> Result<Self> {
        // the reader parses the global header from its first read, so hand
        // it over in one piece
        let mut header = [0u8; GLOBAL_HEADER_LEN];
        input.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                Error::from(CaptureError::InvalidHeader("file shorter than pcap header".into()))
            }
            _ => Error::Io(e),
        })?;

        let bytes_read = Arc::new(AtomicU64::new(0));
        let input = CountingReader {
            inner: Cursor::new(header).chain(input),
            read: Arc::clone(&bytes_read),
        };
        let mut reader = LegacyPcapReader::new(capacity, input)
            .map_err(|e| CaptureError::InvalidHeader(format!("{e:?}")))?;

        let mut stalled = false;
        let (link, nanosecond_precision) = loop {
            match reader.next() {
                Ok((offset, block)) => {
                    let header = match block {
                        PcapBlockOwned::LegacyHeader(hdr) => {
                            Some((hdr.network.0, hdr.is_nanosecond_precision()))
                        }
                        _ => None,
                    };
                    reader.consume(offset);
                    match header {
                        Some((network, nanos)) => break (LinkType::from_linktype(network)?, nanos),
                        None => {
                            return Err(CaptureError::InvalidHeader(
                                "record before global header".into(),
                            )
                            .into())
                        }
                    }
                }
                Err(PcapError::Incomplete(_)) if !stalled => {
                    stalled = !refill(&mut reader, &bytes_read)?;
                }
                Err(e) => {
                    return Err(CaptureError::InvalidHeader(format!("{e:?}")).into());
                }
            }
        };
        debug!(?link, nanosecond_precision, "opened capture");

        Ok(Self {
            reader,
            bytes_read,
            link,
            nanosecond_precision,
            records: 0,
            skipped: 0,
            finished: false,
        })
    }

    /// Declared link-layer encapsulation.
    pub fn link_type(&self) -> LinkType {
        self.link
    }

    /// Number of records read so far, including skipped ones.
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// Number of records that were not TCP over IP.
    pub fn records_skipped(&self) -> u64 {
        self.skipped
    }

    fn fail(&mut self, err: Error) -> Option<Result<Packet>> {
        self.finished = true;
        Some(Err(err))
    }
}

/// Refill the read buffer. Returns whether any new bytes arrived.
///
/// No progress means either end of input, which the next read reports, or
/// a buffer already full with a partial record.
fn refill<R: Read>(reader: &mut LegacyPcapReader<R>, bytes_read: &AtomicU64) -> Result<bool> {
    let before = bytes_read.load(Ordering::Relaxed);
    reader.refill().map_err(|e| refill_error(&e))?;
    Ok(bytes_read.load(Ordering::Relaxed) > before)
}

fn refill_error(e: &PcapError<&[u8]>) -> Error {
    match e {
        PcapError::ReadError => Error::Io(io::Error::new(
            io::ErrorKind::Other,
            "read error while refilling capture buffer",
        )),
        other => CaptureError::InvalidHeader(format!("{other:?}")).into(),
    }
}

enum Step {
    Yield(Packet),
    Skip,
    Fail(CaptureError),
}

impl<R: Read> Iterator for PacketSource<R> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut stalled = false;
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let step = match block {
                        PcapBlockOwned::Legacy(record) => {
                            self.records += 1;
                            let timestamp = Timestamp::from_parts(
                                record.ts_sec,
                                record.ts_usec,
                                self.nanosecond_precision,
                            );
                            match decode_packet(self.link, timestamp, record.data) {
                                Ok(Some(packet)) => Step::Yield(packet),
                                Ok(None) => Step::Skip,
                                Err(e) => Step::Fail(e.at_record(self.records)),
                            }
                        }
                        _ => Step::Skip,
                    };
                    self.reader.consume(offset);
                    stalled = false;

                    match step {
                        Step::Yield(packet) => return Some(Ok(packet)),
                        Step::Skip => {
                            self.skipped += 1;
                            trace!(record = self.records, "skipped non-tcp record");
                        }
                        Step::Fail(e) => return self.fail(e.into()),
                    }
                }
                Err(PcapError::Eof) => {
                    self.finished = true;
                    debug!(
                        records = self.records,
                        skipped = self.skipped,
                        "end of capture"
                    );
                    return None;
                }
                Err(PcapError::Incomplete(_)) => {
                    if stalled {
                        let err = CaptureError::Malformed {
                            record: self.records + 1,
                            reason: "record larger than the read buffer".into(),
                        };
                        return self.fail(err.into());
                    }
                    match refill(&mut self.reader, &self.bytes_read) {
                        Ok(progress) => stalled = !progress,
                        Err(e) => return self.fail(e),
                    }
                }
                Err(PcapError::UnexpectedEof) => {
                    let record = self.records + 1;
                    return self.fail(CaptureError::UnexpectedEof { record }.into());
                }
                Err(e) => {
                    let err = CaptureError::Malformed {
                        record: self.records + 1,
                        reason: format!("{e:?}"),
                    };
                    return self.fail(err.into());
                }
            }
        }
    }
}
