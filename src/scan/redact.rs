//! Redaction: text positions, occurrence search, visual and secure apply
//!
//! Position extraction tokenizes `BT ... ET` text operators in the page's
//! content streams (recursing through Form XObjects), tracking the text
//! and line matrices. Widths are estimates; this is inherently lossy.
//! Visual redaction overlays black rectangles in an appended content
//! stream. Secure redaction additionally rewrites the show operators so
//! the covered glyphs become spaces in the stream itself, preserving each
//! run's character count, then re-compresses and fixes `/Length`.

use std::collections::{BTreeMap, HashSet};

use lazy_static::lazy_static;
use regex::bytes::Regex;

use crate::error::{Error, Result};
use crate::pdf::buffer::escape_literal;
use crate::scan::{
    append_incremental, build_object_map, deflate, inflate, stream_data, ObjectMap,
};

lazy_static! {
    static ref REF_RE: Regex = Regex::new(r"(\d+)\s+(\d+)\s+R\b").unwrap();
    static ref CONTENTS_ONE_RE: Regex = Regex::new(r"/Contents\s+(\d+)\s+\d+\s+R").unwrap();
    static ref CONTENTS_ARR_RE: Regex = Regex::new(r"(?s)/Contents\s*\[(.*?)\]").unwrap();
    static ref XOBJ_DICT_RE: Regex = Regex::new(r"(?s)/XObject\s*<<(.*?)>>").unwrap();
    static ref FORM_RE: Regex = Regex::new(r"/Subtype\s*/Form\b").unwrap();
    static ref FLATE_RE: Regex = Regex::new(r"/Filter\s*/FlateDecode").unwrap();
    static ref LENGTH_RE: Regex = Regex::new(r"/Length\s+\d+(\s+\d+\s+R)?").unwrap();
}

/// A piece of shown text with its estimated geometry
#[derive(Debug, Clone, PartialEq)]
pub struct TextPosition {
    pub text: String,
    pub x: f32,
    /// Baseline minus an approximated descent
    pub y: f32,
    /// Estimated from character count and font size
    pub width: f32,
    pub height: f32,
}

/// A redaction rectangle in page coordinates; `page` is 1-based
#[derive(Debug, Clone, PartialEq)]
pub struct RedactRect {
    pub page: usize,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Text to search for and redact, case-insensitively
#[derive(Debug, Clone)]
pub struct TextSearch {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionMode {
    /// Black boxes only; underlying text survives in the streams
    VisualAllowed,
    /// Boxes plus stream rewriting; fails when nothing could be rewritten
    SecureRequired,
}

/// Per-page classification for the caller-facing report
#[derive(Debug, Clone)]
pub struct PageCapability {
    pub page: usize,
    pub rewritable: bool,
}

/// What a redaction run did
#[derive(Debug, Clone, Default)]
pub struct RedactionReport {
    pub generated_rects: usize,
    pub applied_rects: usize,
    pub matched_text: usize,
    pub pages: Vec<PageCapability>,
    pub warnings: Vec<String>,
}

// --- Content tokenizer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f32),
    Name(String),
    Literal { text: String, span: (usize, usize) },
    Hex { text: String, span: (usize, usize) },
    ArrayStart,
    ArrayEnd,
    Operator(String),
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn decode_hex_string(digits: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(digits.len() / 2 + 1);
    let mut nibbles = digits.iter().filter(|b| b.is_ascii_hexdigit());
    loop {
        let Some(hi) = nibbles.next() else { break };
        let hi = (*hi as char).to_digit(16).unwrap_or(0) as u8;
        let lo = nibbles
            .next()
            .map(|b| (*b as char).to_digit(16).unwrap_or(0) as u8)
            .unwrap_or(0);
        bytes.push((hi << 4) | lo);
    }
    // UTF-16BE heuristic: explicit BOM, or an even-length string whose
    // high bytes are all zero (the common case for CID Identity-H)
    let utf16 = (bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF)
        || (bytes.len() % 2 == 0
            && !bytes.is_empty()
            && bytes.chunks(2).all(|pair| pair[0] == 0));
    if utf16 {
        let units: Vec<u16> = bytes
            .chunks(2)
            .skip(if bytes[0] == 0xFE { 1 } else { 0 })
            .filter(|p| p.len() == 2)
            .map(|p| u16::from_be_bytes([p[0], p[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|b| *b as char).collect()
    }
}

fn tokenize(data: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        match b {
            b'%' => {
                while i < data.len() && data[i] != b'\n' {
                    i += 1;
                }
            }
            b if b.is_ascii_whitespace() => i += 1,
            b'[' => {
                tokens.push(Token::ArrayStart);
                i += 1;
            }
            b']' => {
                tokens.push(Token::ArrayEnd);
                i += 1;
            }
            b'(' => {
                let start = i;
                i += 1;
                let mut depth = 1;
                let mut text = String::new();
                while i < data.len() && depth > 0 {
                    match data[i] {
                        b'\\' => {
                            i += 1;
                            match data.get(i) {
                                Some(b'n') => text.push('\n'),
                                Some(b'r') => text.push('\r'),
                                Some(b't') => text.push('\t'),
                                Some(b'b') => text.push('\u{8}'),
                                Some(b'f') => text.push('\u{c}'),
                                Some(d) if d.is_ascii_digit() => {
                                    // Up to three octal digits
                                    let mut value = 0u16;
                                    let mut digits = 0;
                                    while digits < 3 {
                                        match data.get(i) {
                                            Some(d) if (b'0'..=b'7').contains(d) => {
                                                value = value * 8 + (*d - b'0') as u16;
                                                i += 1;
                                                digits += 1;
                                            }
                                            _ => break,
                                        }
                                    }
                                    i -= 1;
                                    text.push((value as u8) as char);
                                }
                                Some(other) => text.push(*other as char),
                                None => {}
                            }
                            i += 1;
                        }
                        b'(' => {
                            depth += 1;
                            text.push('(');
                            i += 1;
                        }
                        b')' => {
                            depth -= 1;
                            if depth > 0 {
                                text.push(')');
                            }
                            i += 1;
                        }
                        other => {
                            text.push(other as char);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Literal {
                    text,
                    span: (start, i),
                });
            }
            b'<' if data.get(i + 1) == Some(&b'<') => {
                tokens.push(Token::Operator("<<".to_string()));
                i += 2;
            }
            b'>' if data.get(i + 1) == Some(&b'>') => {
                tokens.push(Token::Operator(">>".to_string()));
                i += 2;
            }
            b'<' => {
                let start = i;
                i += 1;
                let digits_start = i;
                while i < data.len() && data[i] != b'>' {
                    i += 1;
                }
                let text = decode_hex_string(&data[digits_start..i]);
                i = (i + 1).min(data.len());
                tokens.push(Token::Hex {
                    text,
                    span: (start, i),
                });
            }
            b'/' => {
                let start = i + 1;
                i += 1;
                while i < data.len() && !data[i].is_ascii_whitespace() && !is_delimiter(data[i]) {
                    i += 1;
                }
                tokens.push(Token::Name(
                    String::from_utf8_lossy(&data[start..i]).to_string(),
                ));
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => {
                let start = i;
                i += 1;
                while i < data.len()
                    && (data[i].is_ascii_digit() || data[i] == b'.' || data[i] == b'-')
                {
                    i += 1;
                }
                let value: f32 = std::str::from_utf8(&data[start..i])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0);
                tokens.push(Token::Number(value));
            }
            _ => {
                let start = i;
                while i < data.len() && !data[i].is_ascii_whitespace() && !is_delimiter(data[i]) {
                    i += 1;
                }
                if i > start {
                    tokens.push(Token::Operator(
                        String::from_utf8_lossy(&data[start..i]).to_string(),
                    ));
                } else {
                    i += 1;
                }
            }
        }
    }
    tokens
}

// --- Text-state walk ---

/// Average glyph width factor for position estimation
const WIDTH_FACTOR: f32 = 0.52;
/// Approximated descent below the baseline
const DESCENT_FACTOR: f32 = 0.2;

#[derive(Debug)]
struct ShowOp {
    text: String,
    is_hex: bool,
    span: (usize, usize),
    position: TextPosition,
}

fn translate(m: [f32; 6], tx: f32, ty: f32) -> [f32; 6] {
    [
        m[0],
        m[1],
        m[2],
        m[3],
        m[4] + tx * m[0] + ty * m[2],
        m[5] + tx * m[1] + ty * m[3],
    ]
}

fn extract_shows(data: &[u8]) -> Vec<ShowOp> {
    const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
    let tokens = tokenize(data);
    let mut shows = Vec::new();

    let mut in_text = false;
    let mut tm = IDENTITY;
    let mut lm = IDENTITY;
    let mut font_size = 12.0f32;
    let mut operands: Vec<Token> = Vec::new();

    let numbers = |operands: &[Token], n: usize| -> Vec<f32> {
        operands
            .iter()
            .rev()
            .filter_map(|t| match t {
                Token::Number(v) => Some(*v),
                _ => None,
            })
            .take(n)
            .collect::<Vec<f32>>()
            .into_iter()
            .rev()
            .collect()
    };

    let record =
        |shows: &mut Vec<ShowOp>, tm: &mut [f32; 6], fs: f32, text: String, is_hex: bool, span: (usize, usize)| {
            let count = text.chars().count() as f32;
            let width = count * fs * WIDTH_FACTOR;
            shows.push(ShowOp {
                position: TextPosition {
                    text: text.clone(),
                    x: tm[4],
                    y: tm[5] - fs * DESCENT_FACTOR,
                    width,
                    height: fs,
                },
                text,
                is_hex,
                span,
            });
            // Subsequent runs on the same line start after this one
            tm[4] += width;
        };

    for token in tokens {
        match token {
            Token::Operator(op) => {
                match op.as_str() {
                    "BT" => {
                        in_text = true;
                        tm = IDENTITY;
                        lm = IDENTITY;
                    }
                    "ET" => in_text = false,
                    "Tm" if in_text => {
                        let v = numbers(&operands, 6);
                        if v.len() == 6 {
                            tm = [v[0], v[1], v[2], v[3], v[4], v[5]];
                            lm = tm;
                        }
                    }
                    "Td" | "TD" if in_text => {
                        let v = numbers(&operands, 2);
                        if v.len() == 2 {
                            lm = translate(lm, v[0], v[1]);
                            tm = lm;
                        }
                    }
                    "T*" if in_text => tm = lm,
                    "Tf" => {
                        if let Some(v) = numbers(&operands, 1).first() {
                            if *v > 0.0 {
                                font_size = *v;
                            }
                        }
                    }
                    "Tj" | "'" | "\"" if in_text => {
                        if op != "Tj" {
                            tm = lm;
                        }
                        let show = operands.iter().rev().find_map(|t| match t {
                            Token::Literal { text, span } => {
                                Some((text.clone(), false, *span))
                            }
                            Token::Hex { text, span } => Some((text.clone(), true, *span)),
                            _ => None,
                        });
                        if let Some((text, is_hex, span)) = show {
                            record(&mut shows, &mut tm, font_size, text, is_hex, span);
                        }
                    }
                    "TJ" if in_text => {
                        for t in &operands {
                            match t {
                                Token::Literal { text, span } => record(
                                    &mut shows,
                                    &mut tm,
                                    font_size,
                                    text.clone(),
                                    false,
                                    *span,
                                ),
                                Token::Hex { text, span } => record(
                                    &mut shows,
                                    &mut tm,
                                    font_size,
                                    text.clone(),
                                    true,
                                    *span,
                                ),
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
                operands.clear();
            }
            other => operands.push(other),
        }
    }
    shows
}

// --- Page stream collection ---

struct PageStream {
    object_number: u32,
    data: Vec<u8>,
    is_flate: bool,
}

fn decode_stream_object(body: &[u8]) -> Option<(Vec<u8>, bool)> {
    let raw = stream_data(body)?;
    if FLATE_RE.is_match(body) {
        inflate(raw).map(|d| (d, true))
    } else {
        Some((raw.to_vec(), false))
    }
}

fn collect_page_streams(map: &ObjectMap, page_body: &[u8]) -> Vec<PageStream> {
    let mut streams = Vec::new();
    let mut content_numbers: Vec<u32> = Vec::new();

    if let Some(caps) = CONTENTS_ARR_RE.captures(page_body) {
        for cap in REF_RE.captures_iter(&caps[1]) {
            if let Ok(num) = String::from_utf8_lossy(&cap[1]).parse() {
                content_numbers.push(num);
            }
        }
    } else if let Some(caps) = CONTENTS_ONE_RE.captures(page_body) {
        if let Ok(num) = String::from_utf8_lossy(&caps[1]).parse() {
            content_numbers.push(num);
        }
    }

    for num in content_numbers {
        if let Some(body) = map.get(num) {
            if let Some((data, is_flate)) = decode_stream_object(body) {
                streams.push(PageStream {
                    object_number: num,
                    data,
                    is_flate,
                });
            } else {
                log::debug!("content stream {num} could not be decoded");
            }
        }
    }

    let mut visited = HashSet::new();
    collect_form_xobjects(map, page_body, &mut streams, &mut visited, 0);
    streams
}

/// Recurse into the Form XObjects a body's resources reference
fn collect_form_xobjects(
    map: &ObjectMap,
    body: &[u8],
    streams: &mut Vec<PageStream>,
    visited: &mut HashSet<u32>,
    depth: usize,
) {
    if depth > 8 {
        return;
    }
    let Some(caps) = XOBJ_DICT_RE.captures(body) else { return };
    for cap in REF_RE.captures_iter(&caps[1]) {
        let Ok(num) = String::from_utf8_lossy(&cap[1]).parse::<u32>() else {
            continue;
        };
        if !visited.insert(num) {
            continue;
        }
        let Some(xobj) = map.get(num) else { continue };
        if !FORM_RE.is_match(xobj) {
            continue;
        }
        if let Some((data, is_flate)) = decode_stream_object(xobj) {
            streams.push(PageStream {
                object_number: num,
                data,
                is_flate,
            });
        }
        collect_form_xobjects(map, &xobj.to_vec(), streams, visited, depth + 1);
    }
}

fn positions_for_page(map: &ObjectMap, page_number: usize) -> Result<Vec<TextPosition>> {
    let pages = map.page_object_numbers();
    let page_obj = pages
        .get(page_number.checked_sub(1).ok_or_else(|| {
            Error::InvalidInput("page numbers are 1-based".to_string())
        })?)
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "page {page_number} out of range (document has {})",
                pages.len()
            ))
        })?;
    let page_body = map
        .get(*page_obj)
        .ok_or_else(|| Error::ParseFailure(format!("page object {page_obj} missing")))?;

    let mut positions = Vec::new();
    for stream in collect_page_streams(map, page_body) {
        positions.extend(extract_shows(&stream.data).into_iter().map(|s| s.position));
    }
    Ok(positions)
}

/// Extract estimated text positions from one page (1-based)
pub fn extract_text_positions(bytes: &[u8], page_number: usize) -> Result<Vec<TextPosition>> {
    let map = build_object_map(bytes)?;
    positions_for_page(&map, page_number)
}

// --- Occurrence search ---

fn char_matches(haystack: &[char], needle: &[char]) -> Vec<usize> {
    let mut found = Vec::new();
    if needle.is_empty() || haystack.len() < needle.len() {
        return found;
    }
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if haystack[i..i + needle.len()]
            .iter()
            .zip(needle)
            .all(|(a, b)| a == b)
        {
            found.push(i);
            i += needle.len();
        } else {
            i += 1;
        }
    }
    found
}

fn lower_chars(s: &str) -> Vec<char> {
    s.chars().flat_map(|c| c.to_lowercase()).collect()
}

fn rects_for_positions(
    positions: &[TextPosition],
    query: &str,
    page: usize,
) -> Vec<RedactRect> {
    let needle = lower_chars(query);
    let mut rects = Vec::new();

    for pos in positions {
        let hay = lower_chars(&pos.text);
        if hay.is_empty() {
            continue;
        }
        let char_width = pos.width / hay.len() as f32;
        for start in char_matches(&hay, &needle) {
            rects.push(RedactRect {
                page,
                x: pos.x + start as f32 * char_width,
                y: pos.y,
                width: needle.len() as f32 * char_width,
                height: pos.height,
            });
        }
    }

    // Phrase queries can span runs; regroup tokens into visual lines and
    // match across the joined text
    if rects.is_empty() && query.contains(' ') {
        rects.extend(phrase_rects(positions, &needle, page));
    }
    rects
}

fn phrase_rects(positions: &[TextPosition], needle: &[char], page: usize) -> Vec<RedactRect> {
    let mut sorted: Vec<&TextPosition> = positions.iter().filter(|p| !p.text.is_empty()).collect();
    sorted.sort_by(|a, b| b.y.partial_cmp(&a.y).unwrap_or(std::cmp::Ordering::Equal));

    let mut rects = Vec::new();
    let mut line: Vec<&TextPosition> = Vec::new();
    let mut lines: Vec<Vec<&TextPosition>> = Vec::new();
    for pos in sorted {
        let same_line = line
            .first()
            .map_or(true, |first| (first.y - pos.y).abs() <= 0.75 * first.height.max(1.0));
        if !same_line {
            lines.push(std::mem::take(&mut line));
        }
        line.push(pos);
    }
    if !line.is_empty() {
        lines.push(line);
    }

    for mut tokens in lines {
        tokens.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));
        // Joined text with a single space between tokens; remember each
        // token's char range so matches map back to geometry
        let mut joined: Vec<char> = Vec::new();
        let mut spans: Vec<(usize, usize, &TextPosition)> = Vec::new();
        for token in &tokens {
            if !joined.is_empty() {
                joined.push(' ');
            }
            let start = joined.len();
            joined.extend(lower_chars(&token.text));
            spans.push((start, joined.len(), token));
        }

        for m in char_matches(&joined, needle) {
            let m_end = m + needle.len();
            let mut rect: Option<RedactRect> = None;
            for (start, end, token) in &spans {
                let overlap_start = m.max(*start);
                let overlap_end = m_end.min(*end);
                if overlap_start >= overlap_end {
                    continue;
                }
                let count = token.text.chars().count().max(1);
                let char_width = token.width / count as f32;
                let x = token.x + (overlap_start - start) as f32 * char_width;
                let width = (overlap_end - overlap_start) as f32 * char_width;
                rect = Some(match rect {
                    None => RedactRect {
                        page,
                        x,
                        y: token.y,
                        width,
                        height: token.height,
                    },
                    Some(r) => {
                        let x0 = r.x.min(x);
                        let x1 = (r.x + r.width).max(x + width);
                        RedactRect {
                            page,
                            x: x0,
                            y: r.y.min(token.y),
                            width: x1 - x0,
                            height: r.height.max(token.height),
                        }
                    }
                });
            }
            rects.extend(rect);
        }
    }
    rects
}

/// Find rectangles covering every occurrence of `query` in the document
pub fn find_text_rects(bytes: &[u8], query: &str) -> Result<Vec<RedactRect>> {
    let map = build_object_map(bytes)?;
    let page_count = map.page_object_numbers().len();
    let mut rects = Vec::new();
    for page in 1..=page_count {
        let positions = positions_for_page(&map, page)?;
        rects.extend(rects_for_positions(&positions, query, page));
    }
    Ok(rects)
}

// --- Apply ---

/// Fraction of a run a rect must cover before the whole run is replaced
const FULL_RUN_OVERLAP: f32 = 0.9;

fn rect_hits_position(rect: &RedactRect, pos: &TextPosition) -> bool {
    rect.x < pos.x + pos.width
        && rect.x + rect.width > pos.x
        && rect.y < pos.y + pos.height
        && rect.y + rect.height > pos.y
}

/// Rewrite one decoded stream; `None` when nothing changed
fn rewrite_stream(data: &[u8], rects: &[RedactRect], searches: &[TextSearch]) -> Option<Vec<u8>> {
    let shows = extract_shows(data);
    let mut replacements: Vec<((usize, usize), bool, String)> = Vec::new();

    for show in &shows {
        let chars: Vec<char> = show.text.chars().collect();
        if chars.is_empty() {
            continue;
        }
        let mut mask = vec![false; chars.len()];
        let char_width = show.position.width / chars.len() as f32;

        for rect in rects {
            if !rect_hits_position(rect, &show.position) {
                continue;
            }
            let start =
                (((rect.x - show.position.x) / char_width).floor().max(0.0)) as usize;
            let end = ((((rect.x + rect.width) - show.position.x) / char_width).ceil())
                .max(0.0) as usize;
            let end = end.min(chars.len());
            if start >= end {
                continue;
            }
            if (end - start) as f32 >= FULL_RUN_OVERLAP * chars.len() as f32 {
                mask.iter_mut().for_each(|m| *m = true);
            } else {
                mask[start..end].iter_mut().for_each(|m| *m = true);
            }
        }

        let hay = lower_chars(&show.text);
        for search in searches {
            let needle = lower_chars(&search.text);
            for at in char_matches(&hay, &needle) {
                mask[at..at + needle.len()].iter_mut().for_each(|m| *m = true);
            }
        }

        if mask.iter().any(|m| *m) {
            // Character count is preserved: each covered glyph becomes a
            // single space
            let new_text: String = chars
                .iter()
                .zip(&mask)
                .map(|(c, covered)| if *covered { ' ' } else { *c })
                .collect();
            replacements.push((show.span, show.is_hex, new_text));
        }
    }

    if replacements.is_empty() {
        return None;
    }

    let mut out = data.to_vec();
    replacements.sort_by_key(|(span, _, _)| std::cmp::Reverse(span.0));
    for ((start, end), is_hex, new_text) in replacements {
        let encoded: Vec<u8> = if is_hex {
            // Keep the 2-byte code-pair structure
            let mut hex = String::with_capacity(new_text.len() * 4 + 2);
            hex.push('<');
            for unit in new_text.encode_utf16() {
                hex.push_str(&format!("{unit:04X}"));
            }
            hex.push('>');
            hex.into_bytes()
        } else {
            format!("({})", escape_literal(&new_text)).into_bytes()
        };
        out.splice(start..end, encoded);
    }
    Some(out)
}

/// Rebuild a stream object body around new data, fixing `/Length`
fn rebuild_stream_body(body: &[u8], new_data: &[u8], compress: bool) -> Vec<u8> {
    let payload = if compress { deflate(new_data) } else { new_data.to_vec() };
    let dict_end = body
        .windows(6)
        .position(|w| w == b"stream")
        .unwrap_or(body.len());
    let dict = LENGTH_RE
        .replace(&body[..dict_end], format!("/Length {}", payload.len()).as_bytes())
        .into_owned();
    let mut out = dict;
    while out.last().is_some_and(|b| b.is_ascii_whitespace()) {
        out.pop();
    }
    out.extend_from_slice(b"\nstream\n");
    out.extend_from_slice(&payload);
    out.extend_from_slice(b"\nendstream");
    out
}

/// Append an overlay reference to a page's `/Contents`
fn page_with_extra_content(page_body: &[u8], overlay: u32) -> Vec<u8> {
    if let Some(caps) = CONTENTS_ARR_RE.captures(page_body) {
        let whole = caps.get(0).unwrap();
        let inner = String::from_utf8_lossy(&caps[1]).to_string();
        let replaced = format!("/Contents [{} {overlay} 0 R]", inner.trim());
        let mut out = page_body.to_vec();
        out.splice(whole.start()..whole.end(), replaced.into_bytes());
        return out;
    }
    if let Some(caps) = CONTENTS_ONE_RE.captures(page_body) {
        let whole = caps.get(0).unwrap();
        let existing = String::from_utf8_lossy(&caps[1]).to_string();
        let replaced = format!("/Contents [{existing} 0 R {overlay} 0 R]");
        let mut out = page_body.to_vec();
        out.splice(whole.start()..whole.end(), replaced.into_bytes());
        return out;
    }
    // Page without contents: create the array
    let mut out = page_body.to_vec();
    if let Some(at) = out.windows(2).rposition(|w| w == b">>") {
        out.splice(at..at, format!(" /Contents [{overlay} 0 R] ").bytes());
    }
    out
}

fn overlay_stream_body(rects: &[&RedactRect]) -> Vec<u8> {
    let mut ops = String::new();
    for rect in rects {
        ops.push_str(&format!(
            "q\n0 0 0 rg\n{:.2} {:.2} {:.2} {:.2} re\nf\nQ\n",
            rect.x, rect.y, rect.width, rect.height
        ));
    }
    format!("<< /Length {} >>\nstream\n{ops}\nendstream", ops.len()).into_bytes()
}

/// Apply rectangle and text-search redactions
///
/// Output is always a working PDF: the original bytes plus an incremental
/// update section. In `SecureRequired` mode the covered text is also
/// rewritten out of the content streams; the call fails if no stream
/// could be rewritten.
pub fn apply_redactions(
    bytes: &[u8],
    rects: &[RedactRect],
    searches: &[TextSearch],
    mode: RedactionMode,
) -> Result<(Vec<u8>, RedactionReport)> {
    let map = build_object_map(bytes)?;
    if map.encrypted {
        return Err(Error::UnsupportedOperation(
            "cannot redact an encrypted document".to_string(),
        ));
    }
    let pages = map.page_object_numbers();
    if pages.is_empty() {
        return Err(Error::ParseFailure("no pages found".to_string()));
    }
    let root = map
        .root
        .ok_or_else(|| Error::ParseFailure("document has no /Root".to_string()))?;

    let mut report = RedactionReport::default();
    let mut all_rects: Vec<RedactRect> = Vec::new();

    for rect in rects {
        if rect.page >= 1 && rect.page <= pages.len() {
            all_rects.push(rect.clone());
        } else {
            report
                .warnings
                .push(format!("rect for page {} ignored (out of range)", rect.page));
        }
    }
    for search in searches {
        for page in 1..=pages.len() {
            let positions = positions_for_page(&map, page)?;
            let found = rects_for_positions(&positions, &search.text, page);
            report.matched_text += found.len();
            all_rects.extend(found);
        }
    }
    report.generated_rects = all_rects.len();

    let mut modified: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
    let mut next_id = map.max_object_number() + 1;
    let mut any_rewritten = false;

    for page in 1..=pages.len() {
        let page_rects: Vec<&RedactRect> =
            all_rects.iter().filter(|r| r.page == page).collect();
        let page_obj = pages[page - 1];
        let Some(page_body) = map.get(page_obj) else {
            report
                .warnings
                .push(format!("page object {page_obj} unreadable"));
            continue;
        };
        let streams = collect_page_streams(&map, page_body);
        report.pages.push(PageCapability {
            page,
            rewritable: !streams.is_empty(),
        });
        if page_rects.is_empty() {
            continue;
        }

        // Black boxes in an appended content stream
        let overlay_id = next_id;
        next_id += 1;
        modified.insert(overlay_id, overlay_stream_body(&page_rects));
        modified.insert(page_obj, page_with_extra_content(page_body, overlay_id));
        report.applied_rects += page_rects.len();

        if mode == RedactionMode::SecureRequired {
            let owned_rects: Vec<RedactRect> =
                page_rects.iter().map(|r| (*r).clone()).collect();
            for stream in &streams {
                if let Some(rewritten) = rewrite_stream(&stream.data, &owned_rects, searches) {
                    let Some(body) = map.get(stream.object_number) else { continue };
                    modified.insert(
                        stream.object_number,
                        rebuild_stream_body(body, &rewritten, stream.is_flate),
                    );
                    any_rewritten = true;
                }
            }
        }
    }

    if mode == RedactionMode::SecureRequired && !any_rewritten {
        return Err(Error::ConsistencyFailure(
            "secure redaction requested but no content stream could be rewritten".to_string(),
        ));
    }

    let out = append_incremental(bytes, &modified, root, map.startxref);
    Ok((out, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_pdf(content: &str) -> Vec<u8> {
        let mut objects = BTreeMap::new();
        objects.insert(1, b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
        objects.insert(2, b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_vec());
        objects.insert(
            3,
            b"<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>".to_vec(),
        );
        objects.insert(
            4,
            format!("<< /Length {} >>\nstream\n{content}\nendstream", content.len()).into_bytes(),
        );
        crate::scan::rebuild_document(&objects, 1)
    }

    #[test]
    fn positions_track_td_and_tm() {
        let pdf = content_pdf(
            "BT\n/F1 12 Tf\n1 0 0 1 0 0 Tm\n100 700 Td\n(Hello World) Tj\nET\n",
        );
        let positions = extract_text_positions(&pdf, 1).unwrap();
        assert_eq!(positions.len(), 1);
        let p = &positions[0];
        assert_eq!(p.text, "Hello World");
        assert_eq!(p.x, 100.0);
        // Baseline 700 minus descent approximation
        assert!((p.y - (700.0 - 12.0 * 0.2)).abs() < 0.01);
        assert!((p.width - 11.0 * 12.0 * 0.52).abs() < 0.01);
        assert_eq!(p.height, 12.0);
    }

    #[test]
    fn hex_utf16_is_decoded() {
        let pdf = content_pdf("BT\n/F1 10 Tf\n50 50 Td\n<00480069> Tj\nET\n");
        let positions = extract_text_positions(&pdf, 1).unwrap();
        assert_eq!(positions[0].text, "Hi");
    }

    #[test]
    fn octal_escapes_in_literals() {
        let shows = extract_shows(b"BT (A\\0502\\051) Tj ET");
        assert_eq!(shows[0].text, "A(2)");
    }

    #[test]
    fn find_rects_slices_by_char_width() {
        let pdf = content_pdf("BT\n/F1 12 Tf\n100 700 Td\n(Hello World) Tj\nET\n");
        let rects = find_text_rects(&pdf, "World").unwrap();
        assert_eq!(rects.len(), 1);
        let rect = &rects[0];
        let char_width = 12.0 * 0.52;
        assert!((rect.x - (100.0 + 6.0 * char_width)).abs() < 0.01);
        assert!((rect.width - 5.0 * char_width).abs() < 0.01);
        assert_eq!(rect.page, 1);
    }

    #[test]
    fn phrase_search_spans_runs() {
        let pdf = content_pdf(
            "BT\n/F1 12 Tf\n100 700 Td\n(Hello) Tj\n(World) Tj\nET\n",
        );
        let rects = find_text_rects(&pdf, "hello world").unwrap();
        assert!(!rects.is_empty());
    }

    #[test]
    fn visual_redaction_appends_overlay() {
        let pdf = content_pdf("BT\n/F1 12 Tf\n100 700 Td\n(secret) Tj\nET\n");
        let (out, report) = apply_redactions(
            &pdf,
            &[],
            &[TextSearch {
                text: "secret".to_string(),
            }],
            RedactionMode::VisualAllowed,
        )
        .unwrap();
        assert_eq!(report.matched_text, 1);
        assert_eq!(report.applied_rects, 1);
        let text = String::from_utf8_lossy(&out).to_string();
        assert!(text.contains("0 0 0 rg"));
        assert!(text.contains("/Prev"));
        // Visual mode leaves the text in the stream
        assert!(text.contains("(secret) Tj"));
    }

    #[test]
    fn secure_redaction_replaces_glyphs_with_spaces() {
        let pdf = content_pdf("BT\n/F1 12 Tf\n100 700 Td\n(Hello World) Tj\nET\n");
        let (out, report) = apply_redactions(
            &pdf,
            &[],
            &[TextSearch {
                text: "World".to_string(),
            }],
            RedactionMode::SecureRequired,
        )
        .unwrap();
        assert!(report.matched_text >= 1);
        let map = build_object_map(&out).unwrap();
        let body = map.get(4).unwrap();
        let data = crate::scan::decoded_stream(body).unwrap();
        let text = String::from_utf8_lossy(&data).to_string();
        // Run length is preserved: five spaces replace five glyphs
        assert!(text.contains("(Hello      ) Tj") || text.contains("(Hello     ) Tj"));
        assert!(!text.contains("World"));
    }

    #[test]
    fn secure_mode_fails_without_rewritable_streams() {
        let mut objects = BTreeMap::new();
        objects.insert(1, b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
        objects.insert(2, b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_vec());
        objects.insert(3, b"<< /Type /Page /Parent 2 0 R >>".to_vec());
        let pdf = crate::scan::rebuild_document(&objects, 1);
        let err = apply_redactions(
            &pdf,
            &[RedactRect {
                page: 1,
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 100.0,
            }],
            &[],
            RedactionMode::SecureRequired,
        )
        .unwrap_err();
        assert_eq!(err.kind_code(), "consistency_failure");
    }

    #[test]
    fn out_of_range_rects_warn() {
        let pdf = content_pdf("BT (x) Tj ET");
        let (_, report) = apply_redactions(
            &pdf,
            &[RedactRect {
                page: 7,
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            }],
            &[],
            RedactionMode::VisualAllowed,
        )
        .unwrap();
        assert_eq!(report.applied_rects, 0);
        assert_eq!(report.warnings.len(), 1);
    }
}
