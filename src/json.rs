//! Safe JSON detection and ASCII-only JSON encoding.
//!
//! Response bodies and gateway frames come from an untrusted peer and may be
//! images, HTML error pages or empty. `is_structured_text` is a cheap token
//! stripping check that runs on arbitrary bytes before anything is handed to
//! the real parser.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

/// Body of an API response: decoded JSON when the bytes were structured text,
/// otherwise the bytes exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Raw(Vec<u8>),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Raw(_) => None,
        }
    }

    /// Top-level field of a JSON object body.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_json()?.get(name)
    }

    pub fn is_json(&self) -> bool {
        matches!(self, ResponseBody::Json(_))
    }
}

fn is_json_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

/// Returns true when `bytes` look like a JSON document.
///
/// Valid escapes are masked first, then string literals, `true`, `false`,
/// `null` and numbers collapse to `]`, then runs of `[` after start of input,
/// `:` or `,` are removed. Whatever is left must be structural punctuation.
pub fn is_structured_text(bytes: &[u8]) -> bool {
    if std::str::from_utf8(bytes).is_err() {
        return false;
    }
    if bytes.iter().all(|&b| is_json_space(b)) {
        return false;
    }

    let masked = mask_escapes(bytes);
    let masked = mask_tokens(&masked);
    let masked = strip_open_brackets(&masked);

    masked
        .iter()
        .all(|&b| matches!(b, b']' | b',' | b':' | b'{' | b'}') || is_json_space(b))
}

fn mask_escapes(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'\\' {
            match input.get(i + 1) {
                Some(b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't') => {
                    out.push(b'@');
                    i += 2;
                    continue;
                }
                Some(b'u')
                    if input.len() >= i + 6
                        && input[i + 2..i + 6].iter().all(u8::is_ascii_hexdigit) =>
                {
                    out.push(b'@');
                    i += 6;
                    continue;
                }
                _ => {}
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

fn mask_tokens(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let rest = &input[i..];
        let token_len = match rest[0] {
            b'"' => string_literal_len(rest),
            b't' if rest.starts_with(b"true") => Some(4),
            b'f' if rest.starts_with(b"false") => Some(5),
            b'n' if rest.starts_with(b"null") => Some(4),
            b'-' | b'0'..=b'9' => number_len(rest),
            _ => None,
        };
        match token_len {
            Some(len) => {
                out.push(b']');
                i += len;
            }
            None => {
                out.push(rest[0]);
                i += 1;
            }
        }
    }
    out
}

/// Length of a `"..."` literal at the start of `rest`. Backslashes left over
/// from the escape pass and raw line breaks end the attempt.
fn string_literal_len(rest: &[u8]) -> Option<usize> {
    for (idx, &b) in rest.iter().enumerate().skip(1) {
        match b {
            b'"' => return Some(idx + 1),
            b'\\' | b'\n' | b'\r' => return None,
            _ => {}
        }
    }
    None
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

fn number_len(rest: &[u8]) -> Option<usize> {
    let mut i = usize::from(rest[0] == b'-');
    let int_digits = count_digits(&rest[i..]);
    if int_digits == 0 {
        return None;
    }
    i += int_digits;

    if rest.get(i) == Some(&b'.') {
        i += 1;
        i += count_digits(&rest[i..]);
    }

    if matches!(rest.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(rest.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_digits = count_digits(&rest[j..]);
        if exp_digits > 0 {
            i = j + exp_digits;
        }
    }

    Some(i)
}

/// End of a run of `[` (each optionally preceded by whitespace) starting at `start`.
fn bracket_run_end(input: &[u8], start: usize) -> Option<usize> {
    let mut end = None;
    let mut i = start;
    loop {
        let mut j = i;
        while j < input.len() && is_json_space(input[j]) {
            j += 1;
        }
        if j < input.len() && input[j] == b'[' {
            j += 1;
            end = Some(j);
            i = j;
        } else {
            return end;
        }
    }
}

fn strip_open_brackets(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if i == 0 {
            if let Some(end) = bracket_run_end(input, 0) {
                i = end;
                continue;
            }
        }
        if matches!(input[i], b':' | b',') {
            if let Some(end) = bracket_run_end(input, i + 1) {
                i = end;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Value, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Decode `bytes` only when they pass the structured-text check; anything else
/// (including text the strict decoder refuses) is handed back untouched.
pub fn decode_body(bytes: Vec<u8>) -> ResponseBody {
    if !is_structured_text(&bytes) {
        return ResponseBody::Raw(bytes);
    }
    match decode(&bytes) {
        Ok(value) => ResponseBody::Json(value),
        Err(e) => {
            tracing::debug!("structured body failed strict decode: {e}");
            ResponseBody::Raw(bytes)
        }
    }
}

/// Writes every code point outside printable ASCII as `\uXXXX`.
struct AsciiFormatter;

impl serde_json::ser::Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut start = 0;
        for (idx, ch) in fragment.char_indices() {
            if ch < '\u{7f}' {
                continue;
            }
            writer.write_all(fragment[start..idx].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = idx + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Compact JSON with all non-ASCII characters escaped, so the wire form does
/// not depend on locale or transfer encoding.
pub fn format_json<T>(value: &T) -> Result<String, serde_json::Error>
where
    T: Serialize + ?Sized,
{
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, AsciiFormatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}
