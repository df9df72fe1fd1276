//! MARCXML (MARC 21 slim) reading and writing.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::CodecError;

use super::record::{ControlField, DataField, Record, Subfield};

pub const MARCXML_NAMESPACE: &str = "http://www.loc.gov/MARC21/slim";

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlOptions {
    pub indent: bool,
    /// Declare XML 1.1 instead of 1.0.
    pub xml11: bool,
}

/// Renders one record as a `<record>` element.
pub fn to_marcxml(record: &Record, indent: bool) -> String {
    let (nl, i1, i2, i3) = if indent {
        ("\n", "  ", "    ", "      ")
    } else {
        ("", "", "", "")
    };

    let mut out = String::new();
    let _ = write!(out, "{}<record>{}", i1, nl);
    let _ = write!(
        out,
        "{}<leader>{}</leader>{}",
        i2,
        escape(record.leader.as_str()),
        nl
    );
    for field in &record.control_fields {
        let _ = write!(
            out,
            "{}<controlfield tag=\"{}\">{}</controlfield>{}",
            i2,
            escape(field.tag.as_str()),
            escape(field.value.as_str()),
            nl
        );
    }
    for field in &record.data_fields {
        let _ = write!(
            out,
            "{}<datafield tag=\"{}\" ind1=\"{}\" ind2=\"{}\">{}",
            i2,
            escape(field.tag.as_str()),
            escape(field.ind1.to_string().as_str()),
            escape(field.ind2.to_string().as_str()),
            nl
        );
        for subfield in &field.subfields {
            let _ = write!(
                out,
                "{}<subfield code=\"{}\">{}</subfield>{}",
                i3,
                escape(subfield.code.to_string().as_str()),
                escape(subfield.value.as_str()),
                nl
            );
        }
        let _ = write!(out, "{}</datafield>{}", i2, nl);
    }
    let _ = writeln!(out, "{}</record>", i1);
    out
}

/// Streams records into a `<collection>` document.
pub struct MarcXmlWriter<W: Write> {
    inner: W,
    options: XmlOptions,
    written: usize,
}

impl<W: Write> MarcXmlWriter<W> {
    pub fn new(mut inner: W, options: XmlOptions) -> std::io::Result<Self> {
        let version = if options.xml11 { "1.1" } else { "1.0" };
        writeln!(inner, "<?xml version=\"{}\" encoding=\"UTF-8\"?>", version)?;
        writeln!(inner, "<collection xmlns=\"{}\">", MARCXML_NAMESPACE)?;
        Ok(Self {
            inner,
            options,
            written: 0,
        })
    }

    pub fn write_record(&mut self, record: &Record) -> std::io::Result<()> {
        self.inner
            .write_all(to_marcxml(record, self.options.indent).as_bytes())?;
        self.written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> usize {
        self.written
    }

    /// Closes the collection and flushes, handing back the inner writer.
    pub fn finish(mut self) -> std::io::Result<W> {
        self.inner.write_all(b"</collection>\n")?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

enum TextTarget {
    Leader,
    Control(String),
    Subfield(char),
}

enum Item {
    Open {
        name: Vec<u8>,
        tag: Option<String>,
        ind1: Option<String>,
        ind2: Option<String>,
        code: Option<String>,
        empty: bool,
    },
    Close(Vec<u8>),
    Text(String),
    Eof,
    Skip,
}

/// Lazily reads `<record>` elements from a MARCXML document.
pub struct MarcXmlReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    source: PathBuf,
    record_index: usize,
    last_good_id: Option<String>,
    finished: bool,
}

impl MarcXmlReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        let file = File::open(path).map_err(|e| CodecError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut reader = Self::new(BufReader::new(file));
        reader.source = path.to_path_buf();
        Ok(reader)
    }
}

fn attribute(element: &BytesStart, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn open_item(element: &BytesStart, empty: bool) -> Item {
    Item::Open {
        name: element.local_name().as_ref().to_vec(),
        tag: attribute(element, b"tag"),
        ind1: attribute(element, b"ind1"),
        ind2: attribute(element, b"ind2"),
        code: attribute(element, b"code"),
        empty,
    }
}

fn first_char(value: Option<String>, fallback: char) -> char {
    value.and_then(|v| v.chars().next()).unwrap_or(fallback)
}

impl<R: BufRead> MarcXmlReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: Reader::from_reader(inner),
            buf: Vec::new(),
            source: PathBuf::from("<stream>"),
            record_index: 0,
            last_good_id: None,
            finished: false,
        }
    }

    pub fn last_good_id(&self) -> Option<&str> {
        self.last_good_id.as_deref()
    }

    /// Byte offset reached in the underlying document.
    pub fn bytes_read(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    fn parse_error(&mut self, message: String) -> CodecError {
        self.finished = true;
        CodecError::Parse {
            message: format!(
                "{} in {} at byte {}",
                message,
                self.source.display(),
                self.bytes_read()
            ),
            last_good_id: self.last_good_id.clone(),
            record_index: self.record_index,
        }
    }

    fn next_item(&mut self) -> Result<Item, String> {
        let item = match self.reader.read_event_into(&mut self.buf) {
            Ok(Event::Start(e)) => open_item(&e, false),
            Ok(Event::Empty(e)) => open_item(&e, true),
            Ok(Event::End(e)) => Item::Close(e.local_name().as_ref().to_vec()),
            Ok(Event::Text(e)) => Item::Text(e.unescape().map_err(|e| e.to_string())?.into_owned()),
            Ok(Event::CData(e)) => Item::Text(String::from_utf8_lossy(&e).into_owned()),
            Ok(Event::Eof) => Item::Eof,
            Ok(_) => Item::Skip,
            Err(e) => return Err(e.to_string()),
        };
        self.buf.clear();
        Ok(item)
    }

    fn read_record(&mut self) -> Result<Option<Record>, String> {
        let mut record: Option<Record> = None;
        let mut data_field: Option<DataField> = None;
        let mut target: Option<TextTarget> = None;
        let mut text = String::new();

        loop {
            match self.next_item()? {
                Item::Open {
                    name,
                    tag,
                    ind1,
                    ind2,
                    code,
                    empty,
                } => {
                    text.clear();
                    match name.as_slice() {
                        b"record" => {
                            record = Some(Record::new(""));
                            if empty {
                                return Ok(record);
                            }
                        }
                        b"leader" => target = Some(TextTarget::Leader),
                        b"controlfield" => {
                            target = Some(TextTarget::Control(tag.unwrap_or_default()))
                        }
                        b"datafield" => {
                            let field = DataField::new(
                                &tag.unwrap_or_default(),
                                first_char(ind1, ' '),
                                first_char(ind2, ' '),
                            );
                            if empty {
                                if let Some(r) = record.as_mut() {
                                    r.data_fields.push(field);
                                }
                            } else {
                                data_field = Some(field);
                            }
                            continue;
                        }
                        b"subfield" => target = Some(TextTarget::Subfield(first_char(code, ' '))),
                        _ => continue,
                    }
                    if empty {
                        self.close_target(&mut record, &mut data_field, target.take(), "");
                    }
                }
                Item::Text(value) => {
                    if target.is_some() {
                        text.push_str(&value);
                    }
                }
                Item::Close(name) => match name.as_slice() {
                    b"record" => return Ok(record),
                    b"datafield" => {
                        if let (Some(r), Some(field)) = (record.as_mut(), data_field.take()) {
                            r.data_fields.push(field);
                        }
                    }
                    b"leader" | b"controlfield" | b"subfield" => {
                        let value = std::mem::take(&mut text);
                        self.close_target(&mut record, &mut data_field, target.take(), &value);
                    }
                    _ => {}
                },
                Item::Eof => {
                    if record.is_some() {
                        return Err("Unexpected end of document inside a record".to_string());
                    }
                    return Ok(None);
                }
                Item::Skip => {}
            }
        }
    }

    fn close_target(
        &self,
        record: &mut Option<Record>,
        data_field: &mut Option<DataField>,
        target: Option<TextTarget>,
        value: &str,
    ) {
        match target {
            Some(TextTarget::Leader) => {
                if let Some(r) = record.as_mut() {
                    r.leader = value.to_string();
                }
            }
            Some(TextTarget::Control(tag)) => {
                if let Some(r) = record.as_mut() {
                    r.control_fields.push(ControlField {
                        tag,
                        value: value.to_string(),
                    });
                }
            }
            Some(TextTarget::Subfield(code)) => {
                if let Some(field) = data_field.as_mut() {
                    field.subfields.push(Subfield {
                        code,
                        value: value.to_string(),
                    });
                }
            }
            None => {}
        }
    }
}

impl<R: BufRead> Iterator for MarcXmlReader<R> {
    type Item = Result<Record, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => {
                self.record_index += 1;
                if let Some(id) = record.control_number() {
                    self.last_good_id = Some(id.to_string());
                }
                Some(Ok(record))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(message) => {
                self.record_index += 1;
                Some(Err(self.parse_error(message)))
            }
        }
    }
}
