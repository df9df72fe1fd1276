//! XML well-formedness gate run before a MARCXML file is opened for
//! record-by-record processing.

use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("The XML file ({}) isn't well formed. Please correct the errors and load again. Error description: {message}{}", file_name(.path), location(.line, .column))]
pub struct WellFormedError {
    pub path: PathBuf,
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn location(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!(" Location: {}:{}.", line, column),
        _ => String::new(),
    }
}

/// 1-based line and column of a byte offset.
fn line_column(content: &[u8], offset: usize) -> (usize, usize) {
    let offset = offset.min(content.len());
    let before = &content[..offset];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let column = match before.iter().rposition(|&b| b == b'\n') {
        Some(nl) => offset - nl,
        None => offset + 1,
    };
    (line, column)
}

/// Checks that the file is a well-formed XML document with a single root
/// element. Never panics; every problem is reported as a [`WellFormedError`].
pub fn check_well_formed(path: &Path) -> Result<(), WellFormedError> {
    let content = std::fs::read(path).map_err(|e| WellFormedError {
        path: path.to_path_buf(),
        message: e.to_string(),
        line: None,
        column: None,
    })?;

    let fail = |message: String, offset: usize| {
        let (line, column) = line_column(&content, offset);
        WellFormedError {
            path: path.to_path_buf(),
            message,
            line: Some(line),
            column: Some(column),
        }
    };

    let mut reader = Reader::from_reader(content.as_slice());
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut roots: usize = 0;

    loop {
        let event = reader.read_event_into(&mut buf);
        let offset = reader.buffer_position() as usize;
        match event {
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                    if roots > 1 {
                        return Err(fail("Multiple root elements".to_string(), offset));
                    }
                }
                depth += 1;
            }
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    roots += 1;
                    if roots > 1 {
                        return Err(fail("Multiple root elements".to_string(), offset));
                    }
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Text(text)) => {
                if depth == 0 && text.iter().any(|b| !b.is_ascii_whitespace()) {
                    return Err(fail(
                        "Content is not allowed outside the root element".to_string(),
                        offset,
                    ));
                }
                if let Err(e) = text.unescape() {
                    return Err(fail(e.to_string(), offset));
                }
            }
            Ok(Event::Eof) => {
                if depth > 0 {
                    return Err(fail(
                        "XML document structures must start and end within the same entity"
                            .to_string(),
                        offset,
                    ));
                }
                if roots == 0 {
                    return Err(fail("Premature end of file".to_string(), offset));
                }
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                let position = reader.error_position() as usize;
                return Err(fail(e.to_string(), position));
            }
        }
        buf.clear();
    }
}
