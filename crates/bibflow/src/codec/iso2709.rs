//! Reader and writer for MARC 21 binary (ISO 2709) record streams.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{CodecError, ConfigError};

use super::record::{ControlField, DataField, Record, Subfield, LEADER_LENGTH};

pub const RECORD_TERMINATOR: u8 = 0x1D;
pub const FIELD_TERMINATOR: u8 = 0x1E;
pub const SUBFIELD_DELIMITER: u8 = 0x1F;

const DIRECTORY_ENTRY_LENGTH: usize = 12;

/// Character encoding of the binary input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarcEncoding {
    #[default]
    Utf8,
    Latin1,
}

impl MarcEncoding {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_uppercase().replace('_', "-").as_str() {
            "UTF-8" | "UTF8" => Ok(Self::Utf8),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" => Ok(Self::Latin1),
            _ => Err(ConfigError::UnsupportedEncoding(name.to_string())),
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderOptions {
    pub encoding: MarcEncoding,
    /// Replace leader characters that are neither alphanumeric nor a space with `0`.
    pub translate_leader_bad_chars_to_zero: bool,
    /// Replace control characters inside field values with spaces.
    pub translate_nonleader_bad_chars_to_spaces: bool,
}

/// Lazily reads records from an ISO 2709 stream.
///
/// The first hard failure ends the iteration; the error carries the control
/// number of the last record that was read successfully.
pub struct MarcReader<R> {
    inner: R,
    source: PathBuf,
    options: ReaderOptions,
    record_index: usize,
    last_good_id: Option<String>,
    bytes_read: u64,
    finished: bool,
}

impl MarcReader<BufReader<File>> {
    pub fn open(path: &Path, options: ReaderOptions) -> Result<Self, CodecError> {
        let file = File::open(path).map_err(|e| CodecError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::with_source(BufReader::new(file), path, options))
    }
}

impl<R: BufRead> MarcReader<R> {
    pub fn new(inner: R, options: ReaderOptions) -> Self {
        Self::with_source(inner, Path::new("<stream>"), options)
    }

    fn with_source(inner: R, source: &Path, options: ReaderOptions) -> Self {
        Self {
            inner,
            source: source.to_path_buf(),
            options,
            record_index: 0,
            last_good_id: None,
            bytes_read: 0,
            finished: false,
        }
    }

    pub fn last_good_id(&self) -> Option<&str> {
        self.last_good_id.as_deref()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn parse_error(&mut self, message: String) -> CodecError {
        self.finished = true;
        CodecError::Parse {
            message,
            last_good_id: self.last_good_id.clone(),
            record_index: self.record_index,
        }
    }
}

impl<R: BufRead> Iterator for MarcReader<R> {
    type Item = Result<Record, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut buf = Vec::new();
        match self.inner.read_until(RECORD_TERMINATOR, &mut buf) {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(n) => {
                self.bytes_read += n as u64;
                // Trailing newlines after the last record are common in dumps.
                if buf.iter().all(|b| b.is_ascii_whitespace()) {
                    self.finished = true;
                    return None;
                }
                self.record_index += 1;
                if buf.last() != Some(&RECORD_TERMINATOR) {
                    return Some(Err(
                        self.parse_error("Premature end of file encountered".to_string())
                    ));
                }
                match parse_record(&buf[..buf.len() - 1], &self.options) {
                    Ok(record) => {
                        if let Some(id) = record.control_number() {
                            self.last_good_id = Some(id.to_string());
                        }
                        Some(Ok(record))
                    }
                    Err(message) => Some(Err(self.parse_error(message))),
                }
            }
            Err(e) => {
                self.finished = true;
                Some(Err(CodecError::Io {
                    path: self.source.clone(),
                    source: e,
                }))
            }
        }
    }
}

fn parse_number(bytes: &[u8], what: &str) -> Result<usize, String> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .ok_or_else(|| format!("Unable to parse {}: '{}'", what, String::from_utf8_lossy(bytes)))
}

fn is_control_tag(tag: &str) -> bool {
    tag.starts_with("00") && tag.bytes().all(|b| b.is_ascii_digit())
}

fn clean_value(value: String, options: &ReaderOptions) -> String {
    if options.translate_nonleader_bad_chars_to_spaces {
        value
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect()
    } else {
        value
    }
}

fn parse_record(data: &[u8], options: &ReaderOptions) -> Result<Record, String> {
    if data.len() < LEADER_LENGTH {
        return Err(format!(
            "Record is shorter than the leader ({} bytes)",
            data.len()
        ));
    }

    let mut leader: String = data[..LEADER_LENGTH].iter().map(|&b| b as char).collect();
    if options.translate_leader_bad_chars_to_zero {
        leader = leader
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == ' ' {
                    c
                } else {
                    '0'
                }
            })
            .collect();
    }

    let base_address = parse_number(&data[12..17], "base address of data")?;
    if base_address <= LEADER_LENGTH || base_address > data.len() {
        return Err(format!("Invalid base address of data: {}", base_address));
    }
    if data[base_address - 1] != FIELD_TERMINATOR {
        return Err("Directory is not terminated by a field terminator".to_string());
    }

    let directory = &data[LEADER_LENGTH..base_address - 1];
    if directory.len() % DIRECTORY_ENTRY_LENGTH != 0 {
        return Err(format!(
            "Invalid directory length: {} is not a multiple of {}",
            directory.len(),
            DIRECTORY_ENTRY_LENGTH
        ));
    }

    let mut record = Record::new(leader);
    for entry in directory.chunks(DIRECTORY_ENTRY_LENGTH) {
        let tag = String::from_utf8_lossy(&entry[..3]).into_owned();
        let length = parse_number(&entry[3..7], "field length")?;
        let start = parse_number(&entry[7..12], "field start position")?;

        let begin = base_address + start;
        let end = begin + length;
        if end > data.len() {
            return Err(format!("Field {} runs past the end of the record", tag));
        }
        let mut field = &data[begin..end];
        if field.last() == Some(&FIELD_TERMINATOR) {
            field = &field[..field.len() - 1];
        }

        if is_control_tag(&tag) {
            let value = clean_value(options.encoding.decode(field), options);
            record.control_fields.push(ControlField { tag, value });
            continue;
        }

        if field.len() < 2 {
            return Err(format!("Data field {} has no indicators", tag));
        }
        let mut data_field = DataField::new(&tag, field[0] as char, field[1] as char);
        for chunk in field[2..].split(|b| *b == SUBFIELD_DELIMITER).skip(1) {
            if chunk.is_empty() {
                continue;
            }
            data_field.subfields.push(Subfield {
                code: chunk[0] as char,
                value: clean_value(options.encoding.decode(&chunk[1..]), options),
            });
        }
        record.data_fields.push(data_field);
    }

    Ok(record)
}

/// Serializes a record to ISO 2709 with UTF-8 field data.
pub fn encode_record(record: &Record) -> Vec<u8> {
    let mut directory = Vec::new();
    let mut fields = Vec::new();

    let mut push_field = |tag: &str, body: Vec<u8>| {
        let start = fields.len();
        fields.extend_from_slice(&body);
        fields.push(FIELD_TERMINATOR);
        let length = fields.len() - start;
        directory.extend_from_slice(format!("{:0>3.3}{:04}{:05}", tag, length, start).as_bytes());
    };

    for field in &record.control_fields {
        push_field(&field.tag, field.value.as_bytes().to_vec());
    }
    for field in &record.data_fields {
        let mut body = Vec::new();
        let mut indicators = [0u8; 4];
        body.extend_from_slice(field.ind1.encode_utf8(&mut indicators).as_bytes());
        body.extend_from_slice(field.ind2.encode_utf8(&mut indicators).as_bytes());
        for subfield in &field.subfields {
            body.push(SUBFIELD_DELIMITER);
            body.extend_from_slice(subfield.code.encode_utf8(&mut indicators).as_bytes());
            body.extend_from_slice(subfield.value.as_bytes());
        }
        push_field(&field.tag, body);
    }

    let base_address = LEADER_LENGTH + directory.len() + 1;
    let total_length = base_address + fields.len() + 1;

    let mut leader: Vec<u8> = format!("{:<24.24}", record.leader).into_bytes();
    leader.truncate(LEADER_LENGTH);
    leader[..5].copy_from_slice(format!("{:05}", total_length).as_bytes());
    leader[12..17].copy_from_slice(format!("{:05}", base_address).as_bytes());

    let mut out = Vec::with_capacity(total_length);
    out.extend_from_slice(&leader);
    out.extend_from_slice(&directory);
    out.push(FIELD_TERMINATOR);
    out.extend_from_slice(&fields);
    out.push(RECORD_TERMINATOR);
    out
}
