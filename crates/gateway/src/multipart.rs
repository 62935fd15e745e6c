//! Extraction of the `file` field from a `multipart/form-data` body.
//!
//! Pure functions over byte slices, no I/O. Only the first part named
//! `file` is returned; other parts are ignored.

use thiserror::Error;

const MULTIPART_FORM_DATA: &str = "multipart/form-data";
const FILE_FIELD: &str = "file";
const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";
const CLOSE_MARKER: &[u8] = b"--";
/// Fragments shorter than this cannot hold a part header and are skipped.
const MIN_PART_LEN: usize = 10;
/// Longest boundary RFC 2046 permits.
pub const MAX_BOUNDARY_LEN: usize = 70;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("multipart boundary is missing")]
    MissingBoundary,
    #[error("no 'file' field in form data")]
    MissingFileField,
    #[error("request body is empty")]
    EmptyBody,
}

/// The uploaded file, borrowed from the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart<'a> {
    pub filename: Option<String>,
    pub bytes: &'a [u8],
}

/// `true` if the content type is `multipart/form-data`, with or without
/// parameters.
pub fn is_multipart_form(content_type: &str) -> bool {
    content_type
        .get(..MULTIPART_FORM_DATA.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(MULTIPART_FORM_DATA))
}

/// The `boundary` parameter of a content type header, unquoted. `None` when
/// absent, empty or longer than [`MAX_BOUNDARY_LEN`].
pub fn boundary_from_content_type(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()))
        .filter(|boundary| !boundary.is_empty() && boundary.len() <= MAX_BOUNDARY_LEN)
}

/// Find the first part whose `Content-Disposition` names it `file`.
pub fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<FilePart<'a>, ParseError> {
    if boundary.is_empty() {
        return Err(ParseError::MissingBoundary);
    }
    if body.is_empty() {
        return Err(ParseError::EmptyBody);
    }

    let delimiter = format!("--{boundary}");

    Fragments::new(body, delimiter.as_bytes())
        .find_map(|(fragment, terminated)| file_part(fragment, terminated))
        .ok_or(ParseError::MissingFileField)
}

fn file_part(fragment: &[u8], terminated: bool) -> Option<FilePart<'_>> {
    if fragment.len() < MIN_PART_LEN {
        return None;
    }

    let header_end = find(fragment, HEADER_SEPARATOR, 0)?;
    let headers = String::from_utf8_lossy(&fragment[..header_end]);

    let filename = headers
        .split("\r\n")
        .find_map(file_field_disposition)?;

    let data = &fragment[header_end + HEADER_SEPARATOR.len()..];

    Some(FilePart {
        filename,
        bytes: strip_terminator(data, terminated),
    })
}

/// For a `Content-Disposition` line naming the `file` field, the optional
/// filename. `None` for any other line.
fn file_field_disposition(line: &str) -> Option<Option<String>> {
    let (header, value) = line.split_once(':')?;
    if !header.trim().eq_ignore_ascii_case("content-disposition") {
        return None;
    }

    let mut is_file = false;
    let mut filename = None;

    for param in split_params(value) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let value = unquote(raw.trim());
        match key.trim() {
            k if k.eq_ignore_ascii_case("name") => is_file = value == FILE_FIELD,
            k if k.eq_ignore_ascii_case("filename") => filename = Some(value.to_string()),
            _ => {}
        }
    }

    is_file.then_some(filename)
}

/// A part followed by another delimiter always ends with the framing CRLF.
/// The last fragment of a body missing its closing delimiter may end with
/// `--\r\n`, `\r\n` or `--`; strip the first of those that matches.
fn strip_terminator(data: &[u8], terminated: bool) -> &[u8] {
    if terminated {
        return data.strip_suffix(CRLF).unwrap_or(data);
    }

    let close_crlf = [CLOSE_MARKER, CRLF].concat();
    data.strip_suffix(close_crlf.as_slice())
        .or_else(|| data.strip_suffix(CRLF))
        .or_else(|| data.strip_suffix(CLOSE_MARKER))
        .unwrap_or(data)
}

/// Split header parameters on `;`, ignoring separators inside quotes.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut quote = None;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match (c, quote) {
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(q)) if c == q => quote = None,
            (';', None) => {
                params.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(value[start..].trim());

    params
}

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return inner;
        }
    }
    value
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    let first = *needle.first()?;
    let mut pos = from;

    while pos + needle.len() <= haystack.len() {
        let offset = haystack[pos..=haystack.len() - needle.len()]
            .iter()
            .position(|&b| b == first)?;
        pos += offset;
        if &haystack[pos..pos + needle.len()] == needle {
            return Some(pos);
        }
        pos += 1;
    }

    None
}

/// Pieces of a body between occurrences of the delimiter. Each item carries
/// whether another delimiter follows it.
struct Fragments<'a, 'd> {
    body: &'a [u8],
    delimiter: &'d [u8],
    pos: Option<usize>,
}

impl<'a, 'd> Fragments<'a, 'd> {
    fn new(body: &'a [u8], delimiter: &'d [u8]) -> Self {
        Self {
            body,
            delimiter,
            pos: Some(0),
        }
    }
}

impl<'a> Iterator for Fragments<'a, '_> {
    type Item = (&'a [u8], bool);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.pos?;

        match find(self.body, self.delimiter, start) {
            Some(end) => {
                self.pos = Some(end + self.delimiter.len());
                Some((&self.body[start..end], true))
            }
            None => {
                self.pos = None;
                Some((&self.body[start..], false))
            }
        }
    }
}
