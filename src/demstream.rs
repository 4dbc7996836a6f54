//! Sources of framed demo records.
//!
//! A `.dem` file opens with a 12 byte header (`PBUFDEM\0` plus a little
//! endian offset to the game summary), followed by records framed as
//! `varint(type) varint(tick) varint(size)` and `size` payload bytes.
//! Bit 6 of the type marks a Snappy compressed payload.
//!
//! Three sources implement the same trait: a buffered file reader, a
//! whole-file memory buffer (which is also what seeking uses, since it
//! can scan for full packets cheaply), and a bzip2 wrapper that inflates
//! into the memory variant.

use crate::errors::ParseError;
use crate::messages::dem;
use log::debug;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Demo header magic.
pub const DEM_HEADER_ID: &[u8; 8] = b"PBUFDEM\0";

/// Size of the fixed demo header in bytes.
pub const DEM_HEADER_SIZE: u64 = 12;

/// Decompressed payloads beyond this size are rejected.
pub const MAX_MESSAGE_SIZE: usize = 0x100000; // 1 MiB

/// Record types the fast path skips when nobody asked for generic
/// forwarding.
const SKIP_TYPES: &[u32] = &[
    dem::FILE_HEADER,
    dem::FILE_INFO,
    dem::SYNC_TICK,
    dem::CONSOLE_CMD,
    dem::CUSTOM_DATA,
    dem::CUSTOM_DATA_CALLBACKS,
    dem::USER_CMD,
    dem::FULL_PACKET,
    dem::SAVE_GAME,
];

/// One outer demo record, payload already decompressed.
#[derive(Debug, Clone, Default)]
pub struct DemMessage {
    /// Whether the payload was Snappy compressed on disk
    pub compressed: bool,
    pub tick: u32,
    /// Numeric record type with the compression bit cleared
    pub kind: u32,
    pub payload: Vec<u8>,
}

/// A source of demo records the parser can drain.
pub trait DemStream {
    /// Whether there are records left to read.
    fn good(&self) -> bool;

    /// Reads the next record. With `skip` set, records the parser has no
    /// internal use for come back empty without being decoded.
    fn read_message(&mut self, skip: bool) -> Result<DemMessage, ParseError>;

    /// Positions the stream at the full packet closest to `minute`.
    fn seek_minute(&mut self, minute: u32) -> Result<(), ParseError>;
}

fn decompress(payload: &[u8]) -> Result<Vec<u8>, ParseError> {
    let size = snap::raw::decompress_len(payload).map_err(|_| ParseError::InvalidCompression)?;
    if size > MAX_MESSAGE_SIZE {
        return Err(ParseError::MessageTooBig(size));
    }
    snap::raw::Decoder::new()
        .decompress_vec(payload)
        .map_err(|_| ParseError::InvalidCompression)
}

/// End-of-stream tracking shared by the stream implementations.
///
/// The stop record (type 0) marks the logical end: the record after it is
/// still served, then the stream reports exhausted even when trailing
/// bytes (the game summary) remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum StreamPhase {
    #[default]
    Running,
    StopSeen,
    Drained,
}

impl StreamPhase {
    fn advance(&mut self, kind: u32) {
        if *self == StreamPhase::StopSeen {
            *self = StreamPhase::Drained;
        }
        if kind == dem::STOP {
            *self = StreamPhase::StopSeen;
        }
    }
}

/// Whole-file in-memory stream. Cheap random access makes it the basis
/// for seeking and the bzip2 variant.
#[derive(Debug, Clone)]
pub struct DemMemoryStream {
    buffer: Vec<u8>,
    pos: usize,
    file: String,
    phase: StreamPhase,
    /// Byte offsets of full packet records, one seek point per minute
    fullpacket_offsets: Vec<usize>,
}

impl DemMemoryStream {
    /// Loads an entire replay file into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let mut file =
            File::open(path).map_err(|_| ParseError::FileNotAccessible(display.clone()))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .map_err(|_| ParseError::FileNotAccessible(display.clone()))?;
        Self::from_bytes(buffer, display)
    }

    /// Wraps an already loaded replay image.
    pub fn from_bytes(buffer: Vec<u8>, file: String) -> Result<Self, ParseError> {
        if (buffer.len() as u64) < DEM_HEADER_SIZE {
            return Err(ParseError::FileTooSmall(buffer.len() as u64));
        }
        if &buffer[..8] != DEM_HEADER_ID {
            return Err(ParseError::HeaderMismatch(
                String::from_utf8_lossy(&buffer[..8]).into_owned(),
            ));
        }

        Ok(DemMemoryStream {
            buffer,
            pos: DEM_HEADER_SIZE as usize,
            file,
            phase: StreamPhase::default(),
            fullpacket_offsets: Vec::new(),
        })
    }

    /// Offset of the game summary, from the fixed header.
    pub fn summary_offset(&self) -> i32 {
        i32::from_le_bytes([self.buffer[8], self.buffer[9], self.buffer[10], self.buffer[11]])
    }

    fn read_var(&mut self) -> Result<u32, ParseError> {
        let mut result: u32 = 0;
        let mut count = 0;
        loop {
            if count == 5 {
                return Err(ParseError::Corrupted(self.file.clone()));
            }
            if self.pos >= self.buffer.len() {
                return Err(ParseError::UnexpectedEof);
            }
            let b = self.buffer[self.pos];
            self.pos += 1;
            result |= ((b & 0x7F) as u32) << (7 * count);
            count += 1;
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
    }
}

impl DemStream for DemMemoryStream {
    fn good(&self) -> bool {
        self.pos < self.buffer.len() && self.phase != StreamPhase::Drained
    }

    fn read_message(&mut self, skip: bool) -> Result<DemMessage, ParseError> {
        let kind = self.read_var()?;
        let compressed = kind & dem::IS_COMPRESSED != 0;
        let kind = kind & !dem::IS_COMPRESSED;

        let tick = self.read_var()?;
        let size = self.read_var()? as usize;

        self.phase.advance(kind);

        if size > self.buffer.len() - self.pos {
            return Err(ParseError::UnexpectedEof);
        }

        if skip && SKIP_TYPES.contains(&kind) {
            self.pos += size;
            return Ok(DemMessage::default());
        }

        let raw = &self.buffer[self.pos..self.pos + size];
        self.pos += size;

        let payload = if compressed {
            decompress(raw)?
        } else {
            raw.to_vec()
        };

        Ok(DemMessage {
            compressed,
            tick,
            kind,
            payload,
        })
    }

    fn seek_minute(&mut self, minute: u32) -> Result<(), ParseError> {
        if self.fullpacket_offsets.is_empty() {
            self.pos = DEM_HEADER_SIZE as usize;
            self.fullpacket_offsets.push(self.pos);

            loop {
                let record_start = self.pos;
                let kind = self.read_var()? & !dem::IS_COMPRESSED;
                let _tick = self.read_var()?;
                let size = self.read_var()? as usize;

                if kind == dem::FULL_PACKET {
                    debug!("full packet found at offset {}", record_start);
                    self.fullpacket_offsets.push(record_start);
                }
                if size > self.buffer.len() - self.pos {
                    return Err(ParseError::UnexpectedEof);
                }
                self.pos += size;
                if kind == dem::STOP {
                    break;
                }
            }
        }

        let slot = std::cmp::min(minute as usize, self.fullpacket_offsets.len() - 1);
        self.pos = self.fullpacket_offsets[slot];
        self.phase = StreamPhase::Running;
        Ok(())
    }
}

/// Buffered file stream; reads records straight off the disk.
#[derive(Debug)]
pub struct DemFileStream {
    reader: BufReader<File>,
    file: String,
    len: u64,
    pos: u64,
    phase: StreamPhase,
    fullpacket_offsets: Vec<u64>,
}

impl DemFileStream {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let file =
            File::open(path).map_err(|_| ParseError::FileNotAccessible(display.clone()))?;
        let len = file
            .metadata()
            .map_err(|_| ParseError::FileNotAccessible(display.clone()))?
            .len();
        if len < DEM_HEADER_SIZE {
            return Err(ParseError::FileTooSmall(len));
        }

        let mut stream = DemFileStream {
            reader: BufReader::new(file),
            file: display,
            len,
            pos: 0,
            phase: StreamPhase::default(),
            fullpacket_offsets: Vec::new(),
        };

        let mut header = [0u8; DEM_HEADER_SIZE as usize];
        stream.read_exact(&mut header)?;
        if &header[..8] != DEM_HEADER_ID {
            return Err(ParseError::HeaderMismatch(
                String::from_utf8_lossy(&header[..8]).into_owned(),
            ));
        }
        Ok(stream)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ParseError> {
        self.reader
            .read_exact(buf)
            .map_err(|_| ParseError::UnexpectedEof)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn read_var(&mut self) -> Result<u32, ParseError> {
        let mut result: u32 = 0;
        let mut count = 0;
        let mut byte = [0u8; 1];
        loop {
            if count == 5 {
                return Err(ParseError::Corrupted(self.file.clone()));
            }
            self.read_exact(&mut byte)?;
            result |= ((byte[0] & 0x7F) as u32) << (7 * count);
            count += 1;
            if byte[0] & 0x80 == 0 {
                return Ok(result);
            }
        }
    }

    fn seek_to(&mut self, pos: u64) -> Result<(), ParseError> {
        self.reader
            .seek(SeekFrom::Start(pos))
            .map_err(|_| ParseError::UnexpectedEof)?;
        self.pos = pos;
        Ok(())
    }
}

impl DemStream for DemFileStream {
    fn good(&self) -> bool {
        self.pos < self.len && self.phase != StreamPhase::Drained
    }

    fn read_message(&mut self, skip: bool) -> Result<DemMessage, ParseError> {
        let kind = self.read_var()?;
        let compressed = kind & dem::IS_COMPRESSED != 0;
        let kind = kind & !dem::IS_COMPRESSED;

        let tick = self.read_var()?;
        let size = self.read_var()? as usize;

        self.phase.advance(kind);

        if size as u64 > self.len - self.pos {
            return Err(ParseError::UnexpectedEof);
        }

        if skip && SKIP_TYPES.contains(&kind) {
            let target = self.pos + size as u64;
            self.seek_to(target)?;
            return Ok(DemMessage::default());
        }

        let mut raw = vec![0u8; size];
        self.read_exact(&mut raw)?;

        let payload = if compressed {
            decompress(&raw)?
        } else {
            raw
        };

        Ok(DemMessage {
            compressed,
            tick,
            kind,
            payload,
        })
    }

    fn seek_minute(&mut self, minute: u32) -> Result<(), ParseError> {
        if self.fullpacket_offsets.is_empty() {
            self.seek_to(DEM_HEADER_SIZE)?;
            self.fullpacket_offsets.push(DEM_HEADER_SIZE);

            loop {
                let record_start = self.pos;
                let kind = self.read_var()? & !dem::IS_COMPRESSED;
                let _tick = self.read_var()?;
                let size = self.read_var()? as u64;

                if kind == dem::FULL_PACKET {
                    self.fullpacket_offsets.push(record_start);
                }
                if size > self.len - self.pos {
                    return Err(ParseError::UnexpectedEof);
                }
                let target = self.pos + size;
                self.seek_to(target)?;
                if kind == dem::STOP {
                    break;
                }
            }
        }

        let slot = std::cmp::min(minute as usize, self.fullpacket_offsets.len() - 1);
        let target = self.fullpacket_offsets[slot];
        self.seek_to(target)?;
        self.phase = StreamPhase::Running;
        Ok(())
    }
}

/// Replay compressed as a whole with bzip2; inflated into memory on open.
#[derive(Debug, Clone)]
pub struct DemBzip2Stream {
    inner: DemMemoryStream,
}

impl DemBzip2Stream {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let file =
            File::open(path).map_err(|_| ParseError::FileNotAccessible(display.clone()))?;

        let mut decoder = bzip2::read::BzDecoder::new(file);
        let mut buffer = Vec::new();
        decoder
            .read_to_end(&mut buffer)
            .map_err(|_| ParseError::InvalidCompression)?;

        Ok(DemBzip2Stream {
            inner: DemMemoryStream::from_bytes(buffer, display)?,
        })
    }
}

impl DemStream for DemBzip2Stream {
    fn good(&self) -> bool {
        self.inner.good()
    }

    fn read_message(&mut self, skip: bool) -> Result<DemMessage, ParseError> {
        self.inner.read_message(skip)
    }

    fn seek_minute(&mut self, minute: u32) -> Result<(), ParseError> {
        self.inner.seek_minute(minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_var(out: &mut Vec<u8>, mut value: u32) {
        loop {
            let b = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                out.push(b);
                return;
            }
            out.push(b | 0x80);
        }
    }

    fn record(out: &mut Vec<u8>, kind: u32, tick: u32, payload: &[u8]) {
        write_var(out, kind);
        write_var(out, tick);
        write_var(out, payload.len() as u32);
        out.extend_from_slice(payload);
    }

    fn demo(records: &[(u32, u32, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(DEM_HEADER_ID);
        out.extend_from_slice(&0i32.to_le_bytes());
        for &(kind, tick, payload) in records {
            record(&mut out, kind, tick, payload);
        }
        out
    }

    #[test]
    fn rejects_bad_header() {
        assert_eq!(
            DemMemoryStream::from_bytes(vec![1, 2, 3], "x".into()).unwrap_err(),
            ParseError::FileTooSmall(3)
        );

        let mut bytes = b"NOTADEM\0".to_vec();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        assert!(matches!(
            DemMemoryStream::from_bytes(bytes, "x".into()),
            Err(ParseError::HeaderMismatch(_))
        ));
    }

    #[test]
    fn reads_records_in_order() {
        let bytes = demo(&[
            (dem::PACKET, 10, b"abc"),
            (dem::PACKET, 20, b"defg"),
            (dem::STOP, 0, b""),
        ]);
        let mut stream = DemMemoryStream::from_bytes(bytes, "test".into()).unwrap();

        let first = stream.read_message(false).unwrap();
        assert_eq!(first.kind, dem::PACKET);
        assert_eq!(first.tick, 10);
        assert_eq!(first.payload, b"abc");
        assert!(!first.compressed);

        let second = stream.read_message(false).unwrap();
        assert_eq!(second.payload, b"defg");

        let stop = stream.read_message(false).unwrap();
        assert_eq!(stop.kind, dem::STOP);
        assert!(!stream.good());
    }

    #[test]
    fn skip_fast_path_consumes_payload() {
        let bytes = demo(&[
            (dem::FILE_HEADER, 0, b"header-stuff"),
            (dem::PACKET, 5, b"xyz"),
        ]);
        let mut stream = DemMemoryStream::from_bytes(bytes, "test".into()).unwrap();

        let skipped = stream.read_message(true).unwrap();
        assert_eq!(skipped.kind, 0);
        assert!(skipped.payload.is_empty());

        let packet = stream.read_message(true).unwrap();
        assert_eq!(packet.kind, dem::PACKET);
        assert_eq!(packet.payload, b"xyz");
    }

    #[test]
    fn compressed_payloads_are_inflated() {
        let raw = b"a longer payload that snappy can work with".to_vec();
        let compressed = snap::raw::Encoder::new().compress_vec(&raw).unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(DEM_HEADER_ID);
        bytes.extend_from_slice(&0i32.to_le_bytes());
        record(
            &mut bytes,
            dem::PACKET | dem::IS_COMPRESSED,
            7,
            &compressed,
        );

        let mut stream = DemMemoryStream::from_bytes(bytes, "test".into()).unwrap();
        let msg = stream.read_message(false).unwrap();
        assert!(msg.compressed);
        assert_eq!(msg.kind, dem::PACKET);
        assert_eq!(msg.payload, raw);
    }

    #[test]
    fn truncated_record_is_eof() {
        let mut bytes = demo(&[]);
        write_var(&mut bytes, dem::PACKET);
        write_var(&mut bytes, 1);
        write_var(&mut bytes, 100); // promises 100 bytes, delivers none
        let mut stream = DemMemoryStream::from_bytes(bytes, "test".into()).unwrap();
        assert_eq!(
            stream.read_message(false).unwrap_err(),
            ParseError::UnexpectedEof
        );
    }

    #[test]
    fn seek_targets_full_packets() {
        let bytes = demo(&[
            (dem::PACKET, 1, b"a"),
            (dem::FULL_PACKET, 1800, b"fp1"),
            (dem::PACKET, 1801, b"b"),
            (dem::FULL_PACKET, 3600, b"fp2"),
            (dem::STOP, 0, b""),
        ]);
        let mut stream = DemMemoryStream::from_bytes(bytes, "test".into()).unwrap();

        stream.seek_minute(1).unwrap();
        let msg = stream.read_message(false).unwrap();
        assert_eq!(msg.kind, dem::FULL_PACKET);
        assert_eq!(msg.payload, b"fp1");

        // Beyond the last known full packet clamps to the final one
        stream.seek_minute(99).unwrap();
        let msg = stream.read_message(false).unwrap();
        assert_eq!(msg.payload, b"fp2");

        // Slot zero is the very start of the record stream
        stream.seek_minute(0).unwrap();
        let msg = stream.read_message(false).unwrap();
        assert_eq!(msg.kind, dem::PACKET);
        assert_eq!(msg.payload, b"a");
    }
}
