//! Form-field detection and filling
//!
//! Fields are discovered through the AcroForm tree (recursing into
//! `/Kids`), with a fallback sweep over widget annotations that carry
//! their own `/T`. Filling edits field bodies in place: buttons get `/V`
//! and `/AS`, text fields get a replaced `/V` plus a freshly generated
//! appearance stream, and the AcroForm's `/NeedAppearances` is forced to
//! false since the appearances now match the values.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::bytes::Regex;

use crate::error::{Error, Result};
use crate::pdf::buffer::escape_literal;
use crate::scan::{build_object_map, dict_ref, rebuild_document, ObjectMap};

lazy_static! {
    static ref REF_RE: Regex = Regex::new(r"(\d+)\s+(\d+)\s+R\b").unwrap();
    static ref FIELDS_RE: Regex = Regex::new(r"(?s)/Fields\s*\[(.*?)\]").unwrap();
    static ref KIDS_RE: Regex = Regex::new(r"(?s)/Kids\s*\[(.*?)\]").unwrap();
    static ref NAME_RE: Regex = Regex::new(r"/T\s*\(((?:[^()\\]|\\.)*)\)").unwrap();
    static ref FT_RE: Regex = Regex::new(r"/FT\s*/(\w+)").unwrap();
    static ref VALUE_STR_RE: Regex = Regex::new(r"/V\s*\(((?:[^()\\]|\\.)*)\)").unwrap();
    static ref VALUE_NAME_RE: Regex = Regex::new(r"/V\s*/([\w.#-]+)").unwrap();
    static ref AS_RE: Regex = Regex::new(r"/AS\s*/([\w.#-]+)").unwrap();
    static ref DA_RE: Regex = Regex::new(r"/DA\s*\(((?:[^()\\]|\\.)*)\)").unwrap();
    static ref RECT_RE: Regex =
        Regex::new(r"/Rect\s*\[\s*([\d.+-]+)\s+([\d.+-]+)\s+([\d.+-]+)\s+([\d.+-]+)\s*\]")
            .unwrap();
    static ref Q_RE: Regex = Regex::new(r"/Q\s+(\d)").unwrap();
    static ref AP_RE: Regex = Regex::new(r"/AP\s*<<[^>]*>>").unwrap();
    static ref NEED_AP_RE: Regex = Regex::new(r"/NeedAppearances\s+(true|false)").unwrap();
    static ref WIDGET_RE: Regex = Regex::new(r"/Subtype\s*/Widget\b").unwrap();
}

/// Detected form-field kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedKind {
    Button,
    Text,
    Other,
}

/// One detected form field
#[derive(Debug, Clone)]
pub struct FormField {
    pub name: String,
    pub object_number: u32,
    pub kind: DetectedKind,
    pub value: Option<String>,
    pub rect: Option<[f32; 4]>,
}

fn unescape_literal(raw: &[u8]) -> String {
    let mut out = String::new();
    let mut iter = raw.iter().copied();
    while let Some(b) = iter.next() {
        if b == b'\\' {
            if let Some(next) = iter.next() {
                out.push(next as char);
            }
        } else {
            out.push(b as char);
        }
    }
    out
}

fn field_from_body(num: u32, body: &[u8]) -> Option<FormField> {
    let name = NAME_RE
        .captures(body)
        .map(|c| unescape_literal(&c[1]))?;
    let kind = match FT_RE.captures(body).map(|c| c[1].to_vec()) {
        Some(ft) if ft == b"Btn" => DetectedKind::Button,
        Some(ft) if ft == b"Tx" => DetectedKind::Text,
        _ => DetectedKind::Other,
    };
    let value = VALUE_STR_RE
        .captures(body)
        .map(|c| unescape_literal(&c[1]))
        .or_else(|| {
            VALUE_NAME_RE
                .captures(body)
                .map(|c| String::from_utf8_lossy(&c[1]).to_string())
        });
    let rect = RECT_RE.captures(body).and_then(|c| {
        let parse = |i: usize| -> Option<f32> {
            std::str::from_utf8(&c[i]).ok()?.parse().ok()
        };
        Some([parse(1)?, parse(2)?, parse(3)?, parse(4)?])
    });
    Some(FormField {
        name,
        object_number: num,
        kind,
        value,
        rect,
    })
}

fn walk_field_tree(map: &ObjectMap, num: u32, out: &mut Vec<FormField>, depth: usize) {
    if depth > 16 {
        return;
    }
    let Some(body) = map.get(num) else { return };
    if let Some(field) = field_from_body(num, body) {
        out.push(field);
    }
    if let Some(kids) = KIDS_RE.captures(body) {
        for cap in REF_RE.captures_iter(&kids[1]) {
            if let Ok(kid) = String::from_utf8_lossy(&cap[1]).parse() {
                walk_field_tree(map, kid, out, depth + 1);
            }
        }
    }
}

fn detect_in_map(map: &ObjectMap) -> Vec<FormField> {
    let mut fields = Vec::new();

    let acroform_body: Option<Vec<u8>> = map
        .root
        .and_then(|r| map.get(r))
        .and_then(|catalog| match dict_ref(catalog, "AcroForm") {
            Some(num) => map.get(num).map(|b| b.to_vec()),
            None => Some(catalog.to_vec()),
        });
    if let Some(body) = acroform_body {
        if let Some(caps) = FIELDS_RE.captures(&body) {
            for cap in REF_RE.captures_iter(&caps[1]) {
                if let Ok(num) = String::from_utf8_lossy(&cap[1]).parse() {
                    walk_field_tree(map, num, &mut fields, 0);
                }
            }
        }
    }

    // Widget annotations with their own /T the tree did not reach
    for ((num, _), body) in &map.objects {
        if WIDGET_RE.is_match(body)
            && !fields.iter().any(|f| f.object_number == *num)
        {
            if let Some(field) = field_from_body(*num, body) {
                fields.push(field);
            }
        }
    }
    fields
}

/// Detect all form fields in a PDF
pub fn detect_form_fields(bytes: &[u8]) -> Result<Vec<FormField>> {
    let map = build_object_map(bytes)?;
    if map.encrypted {
        return Err(Error::UnsupportedOperation(
            "cannot inspect an encrypted document".to_string(),
        ));
    }
    Ok(detect_in_map(&map))
}

/// Convenience: detected field names and values
pub fn extract_field_names(bytes: &[u8]) -> Result<BTreeMap<String, Option<String>>> {
    Ok(detect_form_fields(bytes)?
        .into_iter()
        .map(|f| (f.name, f.value))
        .collect())
}

/// Parse the Adobe XFDF subset into a name-to-value mapping
///
/// Nested `<field>` elements produce dotted names (`parent.child`).
pub fn parse_xfdf(xml: &str) -> Result<BTreeMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut values = BTreeMap::new();
    let mut stack: Vec<String> = Vec::new();
    let mut in_value = false;
    let mut pending = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"field" => {
                    let name = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"name")
                        .map(|a| String::from_utf8_lossy(&a.value).to_string())
                        .unwrap_or_default();
                    stack.push(name);
                }
                b"value" => {
                    in_value = true;
                    pending.clear();
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_value => {
                pending.push_str(
                    &t.unescape()
                        .map_err(|e| Error::InvalidInput(format!("XFDF text: {e}")))?,
                );
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"value" => {
                    in_value = false;
                    if !stack.is_empty() {
                        values.insert(stack.join("."), pending.clone());
                    }
                }
                b"field" => {
                    stack.pop();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::InvalidInput(format!("XFDF: {e}"))),
            _ => {}
        }
    }
    Ok(values)
}

/// True when a button value means "on"
fn is_on_value(value: &str) -> bool {
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "" | "off" | "false" | "no" | "0"
    )
}

/// Button state name for a fill value
fn button_state(value: &str) -> String {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => "Yes".to_string(),
        _ if is_on_value(value) => value.to_string(),
        _ => "Off".to_string(),
    }
}

/// Replace or insert a `/Key value` entry in a dictionary body
fn set_dict_entry(body: &[u8], re: &Regex, replacement: &str) -> Vec<u8> {
    if re.is_match(body) {
        re.replace(body, replacement.as_bytes()).into_owned()
    } else {
        let mut out = body.to_vec();
        if let Some(at) = out.windows(2).rposition(|w| w == b">>") {
            let inserted = format!(" {replacement} ");
            out.splice(at..at, inserted.bytes());
        }
        out
    }
}

/// Font name and size from a `/DA` default-appearance string
fn parse_da(body: &[u8]) -> (String, f32) {
    if let Some(caps) = DA_RE.captures(body) {
        let da = String::from_utf8_lossy(&caps[1]).to_string();
        let tokens: Vec<&str> = da.split_whitespace().collect();
        if let Some(tf) = tokens.iter().position(|t| *t == "Tf") {
            if tf >= 2 {
                let font = tokens[tf - 2].trim_start_matches('/').to_string();
                let size: f32 = tokens[tf - 1].parse().unwrap_or(10.0);
                return (font, if size > 0.0 { size } else { 10.0 });
            }
        }
    }
    ("Helv".to_string(), 10.0)
}

/// Build the replacement appearance stream for a filled text field
fn text_appearance(body: &[u8], value: &str) -> Vec<u8> {
    let rect = RECT_RE
        .captures(body)
        .and_then(|c| {
            let parse = |i: usize| -> Option<f32> {
                std::str::from_utf8(&c[i]).ok()?.parse().ok()
            };
            Some([parse(1)?, parse(2)?, parse(3)?, parse(4)?])
        })
        .unwrap_or([0.0, 0.0, 100.0, 20.0]);
    let (w, h) = ((rect[2] - rect[0]).abs(), (rect[3] - rect[1]).abs());
    let (font, size) = parse_da(body);
    let quadding = Q_RE
        .captures(body)
        .and_then(|c| std::str::from_utf8(&c[1]).ok()?.parse::<u8>().ok())
        .unwrap_or(0);

    // Rough width assumption mirrors the generator's Helvetica factor
    let text_width = value.chars().count() as f32 * size * 0.5;
    let x = match quadding {
        1 => (w - text_width).max(2.0) / 2.0,
        2 => (w - text_width - 2.0).max(2.0),
        _ => 2.0,
    };
    let baseline = (h - size) / 2.0 + size * 0.25;

    let ops = format!(
        "/Tx BMC\nq\n1 1 1 rg\n0 0 {w:.2} {h:.2} re\nf\n0.5 w\n0 0 0 RG\n0.5 0.5 {:.2} {:.2} re\nS\nBT\n0 g\n/{font} {size:.2} Tf\n{x:.2} {baseline:.2} Td\n({}) Tj\nET\nQ\nEMC\n",
        w - 1.0,
        h - 1.0,
        escape_literal(value),
    );
    format!(
        "<< /Type /XObject /Subtype /Form /BBox [0 0 {w:.2} {h:.2}] /Resources << /Font << /{font} << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> >> >> /Length {} >>\nstream\n{ops}\nendstream",
        ops.len(),
    )
    .into_bytes()
}

/// Fill form fields from a name-to-value mapping
pub fn fill_form(bytes: &[u8], values: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    let map = build_object_map(bytes)?;
    if map.encrypted {
        return Err(Error::UnsupportedOperation(
            "cannot fill an encrypted document".to_string(),
        ));
    }
    let fields = detect_in_map(&map);
    let root = map
        .root
        .ok_or_else(|| Error::ParseFailure("document has no /Root".to_string()))?;

    // Collapse generations; later generations win within the scan already
    let mut objects: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
    for ((num, _), body) in &map.objects {
        objects.insert(*num, body.clone());
    }
    let mut next_id = map.max_object_number() + 1;

    for field in &fields {
        let Some(value) = values.get(&field.name) else {
            continue;
        };
        let Some(body) = objects.get(&field.object_number).cloned() else {
            continue;
        };
        let updated = match field.kind {
            DetectedKind::Button => {
                let state = button_state(value);
                let with_v =
                    set_dict_entry(&body, &VALUE_NAME_RE, &format!("/V /{state}"));
                set_dict_entry(&with_v, &AS_RE, &format!("/AS /{state}"))
            }
            DetectedKind::Text | DetectedKind::Other => {
                let with_v = set_dict_entry(
                    &body,
                    &VALUE_STR_RE,
                    &format!("/V ({})", escape_literal(value)),
                );
                let ap_id = next_id;
                next_id += 1;
                objects.insert(ap_id, text_appearance(&body, value));
                set_dict_entry(&with_v, &AP_RE, &format!("/AP << /N {ap_id} 0 R >>"))
            }
        };
        objects.insert(field.object_number, updated);
    }

    // Appearances now match values
    if let Some(catalog) = objects.get(&root).cloned() {
        if let Some(acroform_num) = dict_ref(&catalog, "AcroForm") {
            if let Some(acroform) = objects.get(&acroform_num).cloned() {
                objects.insert(
                    acroform_num,
                    set_dict_entry(&acroform, &NEED_AP_RE, "/NeedAppearances false"),
                );
            }
        }
    }

    Ok(rebuild_document(&objects, root))
}

/// Fill form fields from an XFDF document
pub fn fill_with_xfdf(bytes: &[u8], xfdf: &str) -> Result<Vec<u8>> {
    let values = parse_xfdf(xfdf)?;
    fill_form(bytes, &values)
}
