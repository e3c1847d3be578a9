//! Tolerant PDF scanning for merge, fill, and redaction
//!
//! This is deliberately not a PDF grammar parser. A regex pass collects
//! `N G obj ... endobj` blocks into an object map; object streams are
//! decompressed and unpacked; xref streams are expanded so objects that
//! only appear through them are found too. Anything unreadable is skipped
//! with a log line, and callers degrade to whatever the map did recover.

pub mod fill;
pub mod merge;
pub mod redact;

use std::collections::{BTreeMap, HashSet};
use std::io::Read as _;

use lazy_static::lazy_static;
use regex::bytes::Regex;

use crate::error::{Error, Result};

lazy_static! {
    static ref OBJ_RE: Regex =
        Regex::new(r"(?s)(\d+)\s+(\d+)\s+obj\b(.*?)endobj").unwrap();
    static ref REF_RE: Regex = Regex::new(r"(\d+)\s+(\d+)\s+R\b").unwrap();
    static ref STARTXREF_RE: Regex = Regex::new(r"startxref\s+(\d+)").unwrap();
    static ref ROOT_RE: Regex = Regex::new(r"/Root\s+(\d+)\s+\d+\s+R").unwrap();
    static ref ENCRYPT_RE: Regex = Regex::new(r"/Encrypt\s+\d+\s+\d+\s+R").unwrap();
    static ref KIDS_RE: Regex = Regex::new(r"(?s)/Kids\s*\[(.*?)\]").unwrap();
}

/// Map of object number/generation to raw body bytes
#[derive(Debug, Default)]
pub struct ObjectMap {
    pub objects: BTreeMap<(u32, u16), Vec<u8>>,
    pub encrypted: bool,
    pub root: Option<u32>,
    pub startxref: Option<usize>,
}

impl ObjectMap {
    pub fn get(&self, num: u32) -> Option<&[u8]> {
        self.objects.get(&(num, 0)).map(|b| b.as_slice()).or_else(|| {
            self.objects
                .iter()
                .find(|((n, _), _)| *n == num)
                .map(|(_, b)| b.as_slice())
        })
    }

    pub fn max_object_number(&self) -> u32 {
        self.objects.keys().map(|(n, _)| *n).max().unwrap_or(0)
    }

    /// Page object numbers in document order
    ///
    /// Walks Root -> Pages -> Kids when possible; falls back to every
    /// object whose dictionary says `/Type /Page`, in numeric order.
    pub fn page_object_numbers(&self) -> Vec<u32> {
        if let Some(pages) = self.pages_from_tree() {
            if !pages.is_empty() {
                return pages;
            }
        }
        let page_type = Regex::new(r"/Type\s*/Page\b").unwrap();
        let pages_type = Regex::new(r"/Type\s*/Pages\b").unwrap();
        let mut numbers: Vec<u32> = self
            .objects
            .iter()
            .filter(|(_, body)| page_type.is_match(body) && !pages_type.is_match(body))
            .map(|((n, _), _)| *n)
            .collect();
        numbers.sort();
        numbers.dedup();
        numbers
    }

    fn pages_from_tree(&self) -> Option<Vec<u32>> {
        let catalog_num = self.root.or_else(|| {
            let catalog_type = Regex::new(r"/Type\s*/Catalog\b").unwrap();
            self.objects
                .iter()
                .find(|(_, body)| catalog_type.is_match(body))
                .map(|((n, _), _)| *n)
        })?;
        let catalog = self.get(catalog_num)?;
        let pages_num = dict_ref(catalog, "Pages")?;
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.collect_kids(pages_num, &mut out, &mut visited);
        Some(out)
    }

    fn collect_kids(&self, num: u32, out: &mut Vec<u32>, visited: &mut HashSet<u32>) {
        if !visited.insert(num) {
            return;
        }
        let Some(body) = self.get(num) else { return };
        let pages_type = Regex::new(r"/Type\s*/Pages\b").unwrap();
        if pages_type.is_match(body) {
            if let Some(kids) = KIDS_RE.captures(body) {
                for cap in REF_RE.captures_iter(&kids[1]) {
                    if let Some(kid) = parse_u32(&cap[1]) {
                        self.collect_kids(kid, out, visited);
                    }
                }
            }
        } else {
            out.push(num);
        }
    }
}

fn parse_u32(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// `/Key N G R` value in a dictionary body
pub fn dict_ref(body: &[u8], key: &str) -> Option<u32> {
    let re = Regex::new(&format!(r"/{key}\s+(\d+)\s+\d+\s+R")).ok()?;
    re.captures(body).and_then(|c| parse_u32(&c[1]))
}

/// `/Key N` direct integer value in a dictionary body
pub fn dict_int(body: &[u8], key: &str) -> Option<i64> {
    let re = Regex::new(&format!(r"/{key}\s+(-?\d+)")).ok()?;
    re.captures(body)
        .and_then(|c| std::str::from_utf8(&c[1]).ok()?.parse().ok())
}

/// `/Key [ ... ]` integer array in a dictionary body
pub fn dict_int_array(body: &[u8], key: &str) -> Option<Vec<i64>> {
    let re = Regex::new(&format!(r"(?s)/{key}\s*\[(.*?)\]")).ok()?;
    let inner = re.captures(body)?;
    let text = String::from_utf8_lossy(&inner[1]).to_string();
    let values: Vec<i64> = text
        .split_whitespace()
        .filter_map(|t| t.parse().ok())
        .collect();
    Some(values)
}

/// Raw bytes between `stream` and `endstream` in an object body
pub fn stream_data(body: &[u8]) -> Option<&[u8]> {
    let start_kw = body.windows(6).position(|w| w == b"stream")?;
    let mut start = start_kw + 6;
    if body.get(start) == Some(&b'\r') {
        start += 1;
    }
    if body.get(start) == Some(&b'\n') {
        start += 1;
    }
    let end_kw = body
        .windows(9)
        .rposition(|w| w == b"endstream")?;
    let mut end = end_kw;
    if end > start && body.get(end - 1) == Some(&b'\n') {
        end -= 1;
        if end > start && body.get(end - 1) == Some(&b'\r') {
            end -= 1;
        }
    }
    (end >= start).then(|| &body[start..end])
}

/// Inflate zlib data, tolerating trailing garbage
pub fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    match decoder.read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(_) if !out.is_empty() => Some(out),
        Err(e) => {
            log::debug!("zlib inflate failed: {e}");
            None
        }
    }
}

/// Zlib-compress (content streams always use zlib, never raw deflate)
pub fn deflate(data: &[u8]) -> Vec<u8> {
    use std::io::Write as _;
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

/// Decode a stream body, inflating when the dictionary says FlateDecode
pub fn decoded_stream(body: &[u8]) -> Option<Vec<u8>> {
    let data = stream_data(body)?;
    let flate = Regex::new(r"/Filter\s*/FlateDecode").unwrap();
    if flate.is_match(body) {
        inflate(data)
    } else {
        Some(data.to_vec())
    }
}

/// Build the object map for a PDF byte stream
pub fn build_object_map(bytes: &[u8]) -> Result<ObjectMap> {
    let mut map = ObjectMap {
        encrypted: ENCRYPT_RE.is_match(bytes),
        startxref: STARTXREF_RE
            .captures_iter(bytes)
            .last()
            .and_then(|c| std::str::from_utf8(&c[1]).ok()?.parse().ok()),
        ..Default::default()
    };

    for cap in OBJ_RE.captures_iter(bytes) {
        let (Some(num), Some(generation)) = (parse_u32(&cap[1]), parse_u32(&cap[2])) else {
            continue;
        };
        let body = cap[3].trim_ascii().to_vec();
        map.objects.insert((num, generation as u16), body);
    }

    if map.objects.is_empty() {
        return Err(Error::ParseFailure(
            "no indirect objects found".to_string(),
        ));
    }

    map.root = ROOT_RE
        .captures_iter(bytes)
        .last()
        .and_then(|c| parse_u32(&c[1]));

    expand_object_streams(&mut map);
    expand_xref_streams(&mut map, bytes);

    if map.root.is_none() {
        let catalog_type = Regex::new(r"/Type\s*/Catalog\b").unwrap();
        map.root = map
            .objects
            .iter()
            .find(|(_, body)| catalog_type.is_match(body))
            .map(|((n, _), _)| *n);
    }

    Ok(map)
}

/// Unpack `/Type /ObjStm` compressed object streams
fn expand_object_streams(map: &mut ObjectMap) {
    let objstm_type = Regex::new(r"/Type\s*/ObjStm\b").unwrap();
    let containers: Vec<Vec<u8>> = map
        .objects
        .values()
        .filter(|body| objstm_type.is_match(body))
        .cloned()
        .collect();

    for body in containers {
        let Some(n) = dict_int(&body, "N") else { continue };
        let Some(first) = dict_int(&body, "First") else { continue };
        let Some(data) = decoded_stream(&body) else {
            log::debug!("skipping unreadable object stream");
            continue;
        };
        let header = String::from_utf8_lossy(&data[..(first as usize).min(data.len())])
            .to_string();
        let numbers: Vec<i64> = header
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();

        for pair in numbers.chunks(2).take(n as usize) {
            let [num, offset] = pair else { continue };
            let start = first as usize + *offset as usize;
            if start >= data.len() {
                continue;
            }
            // Each embedded object runs to the next one's offset
            let end = numbers
                .chunks(2)
                .filter_map(|p| p.get(1))
                .map(|o| first as usize + *o as usize)
                .filter(|&o| o > start)
                .min()
                .unwrap_or(data.len())
                .min(data.len());
            let key = (*num as u32, 0u16);
            map.objects
                .entry(key)
                .or_insert_with(|| data[start..end].trim_ascii().to_vec());
        }
    }
}

/// Expand `/Type /XRef` streams: type-1 entries point at uncompressed
/// objects by byte offset; parse those straight out of the raw file.
fn expand_xref_streams(map: &mut ObjectMap, bytes: &[u8]) {
    let xref_type = Regex::new(r"/Type\s*/XRef\b").unwrap();
    let containers: Vec<Vec<u8>> = map
        .objects
        .values()
        .filter(|body| xref_type.is_match(body))
        .cloned()
        .collect();

    for body in containers {
        let Some(w) = dict_int_array(&body, "W") else { continue };
        if w.len() < 3 {
            continue;
        }
        let Some(size) = dict_int(&body, "Size") else { continue };
        let index = dict_int_array(&body, "Index").unwrap_or_else(|| vec![0, size]);
        let Some(raw) = decoded_stream(&body) else { continue };
        let data = match dict_int(&body, "Predictor") {
            Some(p) if p >= 10 => {
                let columns = dict_int(&body, "Columns")
                    .unwrap_or_else(|| w.iter().sum());
                match unpredict_png(&raw, columns as usize) {
                    Some(d) => d,
                    None => continue,
                }
            }
            _ => raw,
        };

        let row_len: usize = w.iter().map(|v| *v as usize).sum();
        if row_len == 0 {
            continue;
        }
        let mut rows = data.chunks_exact(row_len);
        for range in index.chunks(2) {
            let [start, count] = range else { continue };
            for num in *start..(*start + *count) {
                let Some(row) = rows.next() else { break };
                let mut pos = 0usize;
                let field = |row: &[u8], pos: usize, len: usize| -> u64 {
                    row[pos..pos + len]
                        .iter()
                        .fold(0u64, |acc, b| (acc << 8) | *b as u64)
                };
                let entry_type = if w[0] == 0 { 1 } else { field(row, pos, w[0] as usize) };
                pos += w[0] as usize;
                let offset = field(row, pos, w[1] as usize);
                pos += w[1] as usize;
                let _third = field(row, pos, w[2] as usize);

                if entry_type == 1 {
                    let key = (num as u32, 0u16);
                    if map.objects.contains_key(&key) {
                        continue;
                    }
                    let at = offset as usize;
                    if at >= bytes.len() {
                        continue;
                    }
                    if let Some(cap) = OBJ_RE.captures(&bytes[at..]) {
                        if cap.get(0).map(|m| m.start()) == Some(0)
                            || cap.get(0).map(|m| m.start() < 16).unwrap_or(false)
                        {
                            if let Some(n) = parse_u32(&cap[1]) {
                                map.objects
                                    .entry((n, 0))
                                    .or_insert_with(|| cap[3].trim_ascii().to_vec());
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Undo PNG row prediction (predictors 10..15, one byte per sample)
fn unpredict_png(data: &[u8], columns: usize) -> Option<Vec<u8>> {
    if columns == 0 {
        return None;
    }
    let row_len = columns + 1;
    if data.len() % row_len != 0 {
        return None;
    }
    let mut out: Vec<u8> = Vec::with_capacity(data.len() / row_len * columns);
    let mut prev_row = vec![0u8; columns];
    for chunk in data.chunks_exact(row_len) {
        let filter = chunk[0];
        let mut row = chunk[1..].to_vec();
        for i in 0..columns {
            let left = if i > 0 { row[i - 1] } else { 0 };
            let up = prev_row[i];
            let up_left = if i > 0 { prev_row[i - 1] } else { 0 };
            row[i] = match filter {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => {
                    let p = left as i16 + up as i16 - up_left as i16;
                    let (pa, pb, pc) = (
                        (p - left as i16).abs(),
                        (p - up as i16).abs(),
                        (p - up_left as i16).abs(),
                    );
                    let paeth = if pa <= pb && pa <= pc {
                        left
                    } else if pb <= pc {
                        up
                    } else {
                        up_left
                    };
                    row[i].wrapping_add(paeth)
                }
                _ => return None,
            };
        }
        out.extend_from_slice(&row);
        prev_row = row;
    }
    Some(out)
}

/// Rewrite a full document from an object map: header, objects in numeric
/// order, xref, trailer. Used by fill and merge outputs.
pub fn rebuild_document(objects: &BTreeMap<u32, Vec<u8>>, root: u32) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n");
    let mut offsets: BTreeMap<u32, usize> = BTreeMap::new();
    for (num, body) in objects {
        offsets.insert(*num, out.len());
        out.extend_from_slice(format!("{num} 0 obj\n").as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }
    let startxref = out.len();
    write_xref_and_trailer(&mut out, &offsets, root, None, startxref);
    out
}

/// Append an incremental-update section: modified objects, a new xref for
/// just those objects, and a trailer carrying `/Prev`.
pub fn append_incremental(
    original: &[u8],
    modified: &BTreeMap<u32, Vec<u8>>,
    root: u32,
    prev_startxref: Option<usize>,
) -> Vec<u8> {
    let mut out = original.to_vec();
    if out.last() != Some(&b'\n') {
        out.push(b'\n');
    }
    let mut offsets: BTreeMap<u32, usize> = BTreeMap::new();
    for (num, body) in modified {
        offsets.insert(*num, out.len());
        out.extend_from_slice(format!("{num} 0 obj\n").as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }
    let startxref = out.len();
    write_xref_and_trailer(&mut out, &offsets, root, prev_startxref, startxref);
    out
}

fn write_xref_and_trailer(
    out: &mut Vec<u8>,
    offsets: &BTreeMap<u32, usize>,
    root: u32,
    prev: Option<usize>,
    startxref: usize,
) {
    out.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n");
    let ids: Vec<u32> = offsets.keys().copied().collect();
    let mut groups: Vec<(u32, Vec<u32>)> = Vec::new();
    for id in ids {
        match groups.last_mut() {
            Some((start, members)) if *start + members.len() as u32 == id => members.push(id),
            _ => groups.push((id, vec![id])),
        }
    }
    for (start, members) in groups {
        out.extend_from_slice(format!("{start} {}\n", members.len()).as_bytes());
        for id in members {
            out.extend_from_slice(format!("{:010} 00000 n \n", offsets[&id]).as_bytes());
        }
    }
    let size = offsets.keys().max().copied().unwrap_or(0) + 1;
    out.extend_from_slice(format!("trailer\n<< /Size {size} /Root {root} 0 R").as_bytes());
    if let Some(prev) = prev {
        out.extend_from_slice(format!(" /Prev {prev}").as_bytes());
    }
    out.extend_from_slice(format!(" >>\nstartxref\n{startxref}\n%%EOF\n").as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_pdf() -> Vec<u8> {
        let mut objects = BTreeMap::new();
        objects.insert(1, b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
        objects.insert(2, b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_vec());
        objects.insert(
            3,
            b"<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".to_vec(),
        );
        rebuild_document(&objects, 1)
    }

    #[test]
    fn scans_objects_and_root() {
        let pdf = simple_pdf();
        let map = build_object_map(&pdf).unwrap();
        assert_eq!(map.objects.len(), 3);
        assert_eq!(map.root, Some(1));
        assert!(!map.encrypted);
        assert!(map.startxref.is_some());
    }

    #[test]
    fn page_numbers_follow_the_tree() {
        let pdf = simple_pdf();
        let map = build_object_map(&pdf).unwrap();
        assert_eq!(map.page_object_numbers(), vec![3]);
    }

    #[test]
    fn encrypted_trailer_is_detected() {
        let mut pdf = simple_pdf();
        let tail = b"trailer\n<< /Size 4 /Root 1 0 R /Encrypt 9 0 R >>\n";
        pdf.extend_from_slice(tail);
        let map = build_object_map(&pdf).unwrap();
        assert!(map.encrypted);
    }

    #[test]
    fn object_streams_are_unpacked() {
        // Two tiny objects packed into an ObjStm, offsets 0 and 11
        let payload = b"10 0 11 11\n<< /A 1 >> << /B 2 >>";
        let header_len = 11; // "10 0 11 11\n"
        let compressed = deflate(payload);
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.5\n");
        pdf.extend_from_slice(
            format!(
                "4 0 obj\n<< /Type /ObjStm /N 2 /First {header_len} /Filter /FlateDecode /Length {} >>\nstream\n",
                compressed.len()
            )
            .as_bytes(),
        );
        pdf.extend_from_slice(&compressed);
        pdf.extend_from_slice(b"\nendstream\nendobj\n");
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");

        let map = build_object_map(&pdf).unwrap();
        assert_eq!(
            map.get(10).map(|b| b.to_vec()),
            Some(b"<< /A 1 >>".to_vec())
        );
        assert_eq!(
            map.get(11).map(|b| b.to_vec()),
            Some(b"<< /B 2 >>".to_vec())
        );
    }

    #[test]
    fn stream_data_trims_delimiters() {
        let body = b"<< /Length 5 >>\nstream\nhello\nendstream";
        assert_eq!(stream_data(body), Some(&b"hello"[..]));
    }

    #[test]
    fn inflate_round_trip() {
        let data = b"some content stream data";
        assert_eq!(inflate(&deflate(data)).unwrap(), data);
    }

    #[test]
    fn png_up_predictor() {
        // Two rows of 3 columns, filter 2 (Up)
        let raw = [2u8, 1, 2, 3, 2, 1, 1, 1];
        let out = unpredict_png(&raw, 3).unwrap();
        assert_eq!(out, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn incremental_update_preserves_original() {
        let pdf = simple_pdf();
        let mut modified = BTreeMap::new();
        modified.insert(3u32, b"<< /Type /Page /Parent 2 0 R >>".to_vec());
        let updated = append_incremental(&pdf, &modified, 1, Some(100));
        assert!(updated.starts_with(&pdf[..pdf.len().min(64)]));
        let text = String::from_utf8_lossy(&updated).to_string();
        assert!(text.contains("/Prev 100"));
        assert!(text.ends_with("%%EOF\n"));
    }

    #[test]
    fn garbage_input_is_a_parse_failure() {
        let err = build_object_map(b"this is not a pdf at all").unwrap_err();
        assert_eq!(err.kind_code(), "parse_failure");
    }
}
