use std::path::Path;

use thiserror::Error;

use crate::encoder::{TAG_DICTIONARY, TAG_EXTENT};
use crate::site_registry::LogLevel;

/// Errors produced while decoding an output stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error reading log: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended inside a record, extent or dictionary entry.
    #[error("truncated log stream at byte {0}")]
    Truncated(usize),

    #[error("unknown stream tag {0:#04x} at byte {1}")]
    UnknownTag(u8, usize),

    /// A record referenced a site id with no earlier dictionary entry.
    #[error("record references site {0} before its dictionary entry")]
    UnknownSite(u64),

    #[error("dictionary entry for site {0} out of registration order")]
    BadDictionaryIndex(u64),

    #[error("dictionary entry contains invalid UTF-8")]
    BadUtf8(#[from] std::str::Utf8Error),
}

/// A log site reconstructed from a dictionary entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSite {
    pub severity: LogLevel,
    pub file: String,
    pub line: u32,
    pub format: String,
}

/// A single log record reconstructed from the stream.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Id of the staging buffer (producer thread) the record came from.
    pub buffer_id: u32,
    /// Index into the dictionary read so far; resolve via `LogReader::site`.
    pub site_id: u32,
    /// Raw tick-counter timestamp recorded by the producer.
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

struct ExtentState {
    buffer_id: u32,
    remaining: usize,
    previous_timestamp: u64,
}

/// Sequential reader for the compressed output stream. Maintains the
/// dictionary as it goes: entries for a site id must precede the records
/// that reference it, and the reader rejects streams that violate this.
///
/// A dictionary entry whose id is already known replaces the previous entry;
/// this occurs when the engine re-emits the dictionary after the output file
/// is rotated back onto a file that already holds a copy.
pub struct LogReader<'a> {
    data: &'a [u8],
    pos: usize,
    sites: Vec<DecodedSite>,
    extent: Option<ExtentState>,
}

impl<'a> LogReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            sites: Vec::new(),
            extent: None,
        }
    }

    /// Dictionary accumulated so far.
    pub fn sites(&self) -> &[DecodedSite] {
        &self.sites
    }

    pub fn site(&self, id: u32) -> Option<&DecodedSite> {
        self.sites.get(id as usize)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(DecodeError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        if self.pos + 4 > self.data.len() {
            return Err(DecodeError::Truncated(self.pos));
        }
        let value = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(value)
    }

    fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(DecodeError::Truncated(self.pos));
            }
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + len > self.data.len() {
            return Err(DecodeError::Truncated(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_dictionary_entry(&mut self) -> Result<(), DecodeError> {
        let id = self.read_varint()?;
        let severity = LogLevel::from_raw(self.read_u8()? as i32);
        let line = self.read_varint()? as u32;
        let file_len = self.read_varint()? as usize;
        let file = std::str::from_utf8(self.read_bytes(file_len)?)?.to_owned();
        let format_len = self.read_varint()? as usize;
        let format = std::str::from_utf8(self.read_bytes(format_len)?)?.to_owned();

        let entry = DecodedSite {
            severity,
            file,
            line,
            format,
        };
        if (id as usize) < self.sites.len() {
            self.sites[id as usize] = entry;
        } else if id as usize == self.sites.len() {
            self.sites.push(entry);
        } else {
            return Err(DecodeError::BadDictionaryIndex(id));
        }
        Ok(())
    }

    /// Reads the next log record, consuming any dictionary entries and
    /// extent headers in between. Returns `None` at a clean end of stream.
    pub fn read_entry(&mut self) -> Result<Option<LogEntry>, DecodeError> {
        loop {
            let in_extent = match &self.extent {
                Some(extent) if extent.remaining == 0 => {
                    self.extent = None;
                    continue;
                }
                Some(extent) => Some(extent.remaining),
                None => None,
            };

            if let Some(remaining) = in_extent {
                let record_start = self.pos;
                let site_id = self.read_varint()?;
                let delta = self.read_varint()?;
                let payload_len = self.read_varint()? as usize;
                let payload = self.read_bytes(payload_len)?.to_vec();
                let record_len = self.pos - record_start;

                if record_len > remaining {
                    return Err(DecodeError::Truncated(record_start));
                }
                if site_id as usize >= self.sites.len() {
                    return Err(DecodeError::UnknownSite(site_id));
                }

                let extent = self.extent.as_mut().unwrap();
                extent.remaining -= record_len;
                extent.previous_timestamp = extent.previous_timestamp.wrapping_add(delta);

                return Ok(Some(LogEntry {
                    buffer_id: extent.buffer_id,
                    site_id: site_id as u32,
                    timestamp: extent.previous_timestamp,
                    payload,
                }));
            }

            if self.pos >= self.data.len() {
                return Ok(None);
            }

            let tag_pos = self.pos;
            match self.read_u8()? {
                TAG_DICTIONARY => self.read_dictionary_entry()?,
                TAG_EXTENT => {
                    let buffer_id = self.read_varint()? as u32;
                    let _wrapped = self.read_u8()? != 0;
                    let body_len = self.read_u32()? as usize;
                    if self.pos + body_len > self.data.len() {
                        return Err(DecodeError::Truncated(self.pos));
                    }
                    self.extent = Some(ExtentState {
                        buffer_id,
                        remaining: body_len,
                        previous_timestamp: 0,
                    });
                }
                // Zero bytes between flushes are direct-I/O alignment
                // padding; no valid element starts with a zero tag.
                0 => {
                    while self.pos < self.data.len() && self.data[self.pos] == 0 {
                        self.pos += 1;
                    }
                }
                tag => return Err(DecodeError::UnknownTag(tag, tag_pos)),
            }
        }
    }
}

/// Decodes an entire log file into its entries.
pub fn read_log_file(path: impl AsRef<Path>) -> Result<Vec<LogEntry>, DecodeError> {
    let data = std::fs::read(path)?;
    let mut reader = LogReader::new(&data);
    let mut entries = Vec::new();
    while let Some(entry) = reader.read_entry()? {
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{write_raw_record, Encoder, RAW_RECORD_HEADER_SIZE};
    use crate::site_registry::SiteInfo;
    use std::sync::atomic::AtomicU64;

    fn encode_one(site: SiteInfo, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 4096];
        let mut encoder = Encoder::new(out.as_mut_ptr(), out.len());
        let sites = [site];
        let mut next = 0;
        encoder.encode_new_dictionary_entries(&mut next, &sites);

        let mut raw = vec![0u8; RAW_RECORD_HEADER_SIZE + payload.len()];
        unsafe { write_raw_record(raw.as_mut_ptr(), 0, 42, payload) };
        let logs = AtomicU64::new(0);
        let consumed = encoder.encode_log_msgs(&raw, 7, true, &sites, &logs);
        assert_eq!(consumed, raw.len());

        out.truncate(encoder.encoded_bytes());
        out
    }

    #[test]
    fn test_roundtrip_single_record() {
        let site = SiteInfo {
            severity: LogLevel::Warning,
            file: "reader.rs",
            line: 99,
            format: "value={}",
        };
        let stream = encode_one(site, b"payload");

        let mut reader = LogReader::new(&stream);
        let entry = reader.read_entry().unwrap().unwrap();
        assert_eq!(entry.buffer_id, 7);
        assert_eq!(entry.site_id, 0);
        assert_eq!(entry.timestamp, 42);
        assert_eq!(entry.payload, b"payload");
        let decoded = reader.site(0).unwrap();
        assert_eq!(decoded.format, "value={}");
        assert_eq!(decoded.severity, LogLevel::Warning);
        assert_eq!(decoded.line, 99);
        assert!(reader.read_entry().unwrap().is_none());
    }

    #[test]
    fn test_record_before_dictionary_rejected() {
        let site = SiteInfo {
            severity: LogLevel::Notice,
            file: "reader.rs",
            line: 1,
            format: "{}",
        };
        let stream = encode_one(site, b"x");

        // Measure the dictionary prefix by encoding it alone, then drop it;
        // the extent that remains references a site the reader never saw.
        let mut scratch = vec![0u8; 4096];
        let mut dictionary_only = Encoder::new(scratch.as_mut_ptr(), scratch.len());
        let mut next = 0;
        dictionary_only.encode_new_dictionary_entries(&mut next, &[site]);
        let dictionary_len = dictionary_only.encoded_bytes();

        let mut reader = LogReader::new(&stream[dictionary_len..]);
        assert!(matches!(
            reader.read_entry(),
            Err(DecodeError::UnknownSite(0))
        ));
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let site = SiteInfo {
            severity: LogLevel::Notice,
            file: "reader.rs",
            line: 1,
            format: "{}",
        };
        let stream = encode_one(site, b"abcdefgh");
        let mut reader = LogReader::new(&stream[..stream.len() - 3]);
        assert!(matches!(
            reader.read_entry(),
            Err(DecodeError::Truncated(_))
        ));
    }

    #[test]
    fn test_trailing_zero_padding_is_accepted() {
        let site = SiteInfo {
            severity: LogLevel::Notice,
            file: "reader.rs",
            line: 1,
            format: "{}",
        };
        let mut stream = encode_one(site, b"x");
        stream.extend_from_slice(&[0u8; 120]);

        let mut reader = LogReader::new(&stream);
        assert!(reader.read_entry().unwrap().is_some());
        assert!(reader.read_entry().unwrap().is_none());
    }
}
