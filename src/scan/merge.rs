//! PDF merging by object-number remapping
//!
//! Every input keeps its objects byte-for-byte except that indirect
//! references are shifted by a per-document offset (outside stream data),
//! each page's `/Parent` is forced onto the merger's page tree, and any
//! form fields are collected into a combined AcroForm.

use std::collections::BTreeMap;
use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::bytes::Regex;

use crate::error::{Error, Result};
use crate::scan::{build_object_map, rebuild_document, ObjectMap};

lazy_static! {
    static ref REF_RE: Regex = Regex::new(r"(\d+)\s+(\d+)\s+R\b").unwrap();
    static ref PARENT_RE: Regex = Regex::new(r"/Parent\s+\d+\s+\d+\s+R").unwrap();
    static ref FIELDS_RE: Regex = Regex::new(r"(?s)/Fields\s*\[(.*?)\]").unwrap();
    static ref WIDGET_RE: Regex = Regex::new(r"/Subtype\s*/Widget\b").unwrap();
    static ref FIELD_NAME_RE: Regex = Regex::new(r"/T\s*\(").unwrap();
}

/// Options for merging PDFs from disk
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Input PDF file paths in the order they should be merged
    pub input_paths: Vec<PathBuf>,
    /// Output PDF file path
    pub output_path: PathBuf,
}

/// Merge PDF files on disk
pub fn merge_files(options: &MergeOptions) -> Result<()> {
    if options.input_paths.is_empty() {
        return Err(Error::InvalidInput("no input files provided".to_string()));
    }
    let mut inputs = Vec::new();
    for path in &options.input_paths {
        if !path.exists() {
            return Err(Error::MissingResource(format!(
                "input file not found: {}",
                path.display()
            )));
        }
        inputs.push(std::fs::read(path)?);
    }
    let input_refs: Vec<&[u8]> = inputs.iter().map(|v| v.as_slice()).collect();
    let merged = merge_documents(&input_refs)?;
    std::fs::write(&options.output_path, merged)?;
    Ok(())
}

/// Shift every `K M R` reference in `body` by `offset`, leaving the bytes
/// between `stream` and `endstream` untouched.
fn remap_references(body: &[u8], offset: u32) -> Vec<u8> {
    let remap = |segment: &[u8]| -> Vec<u8> {
        REF_RE
            .replace_all(segment, |caps: &regex::bytes::Captures| {
                let num: u32 = std::str::from_utf8(&caps[1])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                let generation = String::from_utf8_lossy(&caps[2]).to_string();
                format!("{} {generation} R", num + offset).into_bytes()
            })
            .into_owned()
    };

    let Some(stream_at) = body.windows(6).position(|w| w == b"stream") else {
        return remap(body);
    };
    let Some(end_at) = body.windows(9).rposition(|w| w == b"endstream") else {
        return remap(body);
    };
    let mut out = remap(&body[..stream_at]);
    out.extend_from_slice(&body[stream_at..end_at + 9]);
    out.extend_from_slice(&remap(&body[end_at + 9..]));
    out
}

/// Collect the form-field object numbers of one document (pre-remap)
fn acroform_fields(map: &ObjectMap) -> Vec<u32> {
    let mut fields = Vec::new();

    // Through the catalog's AcroForm dictionary when reachable
    if let Some(catalog) = map.root.and_then(|r| map.get(r)) {
        let acroform_body: Option<Vec<u8>> = match crate::scan::dict_ref(catalog, "AcroForm") {
            Some(num) => map.get(num).map(|b| b.to_vec()),
            None => Some(catalog.to_vec()),
        };
        if let Some(body) = acroform_body {
            if let Some(caps) = FIELDS_RE.captures(&body) {
                for cap in REF_RE.captures_iter(&caps[1]) {
                    if let Ok(num) = String::from_utf8_lossy(&cap[1]).parse() {
                        fields.push(num);
                    }
                }
            }
        }
    }

    // Widgets carrying their own /T that the tree missed
    for ((num, _), body) in &map.objects {
        if WIDGET_RE.is_match(body) && FIELD_NAME_RE.is_match(body) && !fields.contains(num) {
            fields.push(*num);
        }
    }
    fields
}

/// Merge documents in order; returns the merged byte stream
pub fn merge_documents(inputs: &[&[u8]]) -> Result<Vec<u8>> {
    if inputs.is_empty() {
        return Err(Error::InvalidInput("no input documents provided".to_string()));
    }

    let mut objects: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
    let mut kids: Vec<u32> = Vec::new();
    let mut fields: Vec<u32> = Vec::new();
    // Object numbers 1 and 2 are reserved for the merger's catalog and
    // page tree
    let mut offset: u32 = 2;

    for (index, bytes) in inputs.iter().enumerate() {
        let map = build_object_map(bytes)?;
        if map.encrypted {
            return Err(Error::UnsupportedOperation(format!(
                "input {} is encrypted",
                index + 1
            )));
        }
        let pages = map.page_object_numbers();
        if pages.is_empty() {
            return Err(Error::InvalidInput(format!(
                "input {} has no pages",
                index + 1
            )));
        }
        let doc_fields = acroform_fields(&map);

        for ((num, _generation), body) in &map.objects {
            objects.insert(num + offset, remap_references(body, offset));
        }
        for page in pages {
            let new_num = page + offset;
            if let Some(body) = objects.get_mut(&new_num) {
                // Re-root the page under the merged page tree
                let reparented = if PARENT_RE.is_match(body) {
                    PARENT_RE.replace(body, &b"/Parent 2 0 R"[..]).into_owned()
                } else {
                    let mut with_parent = body.clone();
                    if let Some(at) = with_parent.windows(2).rposition(|w| w == b">>") {
                        with_parent.splice(at..at, b" /Parent 2 0 R ".iter().copied());
                    }
                    with_parent
                };
                *body = reparented;
            }
            kids.push(new_num);
        }
        for field in doc_fields {
            let remapped = field + offset;
            if !fields.contains(&remapped) {
                fields.push(remapped);
            }
        }
        offset += map.max_object_number();
    }

    let mut catalog = String::from("<< /Type /Catalog /Pages 2 0 R");
    if !fields.is_empty() {
        catalog.push_str(" /AcroForm << /Fields [");
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                catalog.push(' ');
            }
            catalog.push_str(&format!("{field} 0 R"));
        }
        catalog.push_str("] >>");
    }
    catalog.push_str(" >>");
    objects.insert(1, catalog.into_bytes());

    let mut pages_dict = String::from("<< /Type /Pages /Kids [");
    for (i, kid) in kids.iter().enumerate() {
        if i > 0 {
            pages_dict.push(' ');
        }
        pages_dict.push_str(&format!("{kid} 0 R"));
    }
    pages_dict.push_str(&format!("] /Count {} >>", kids.len()));
    objects.insert(2, pages_dict.into_bytes());

    Ok(rebuild_document(&objects, 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::generate_pdf;
    use crate::template::{Template, Title};

    fn one_page_pdf(title: &str) -> Vec<u8> {
        generate_pdf(&Template {
            title: Some(Title {
                text: Some(title.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn remap_shifts_references_outside_streams() {
        let body = b"<< /Parent 2 0 R /Length 4 >>\nstream\n3 0 R\nendstream";
        let out = remap_references(body, 10);
        let text = String::from_utf8_lossy(&out).to_string();
        assert!(text.contains("/Parent 12 0 R"));
        // The stream payload must stay byte-identical
        assert!(text.contains("stream\n3 0 R\nendstream"));
    }

    #[test]
    fn merged_page_count_is_the_sum() {
        let a = one_page_pdf("First");
        let b = one_page_pdf("Second");
        let merged = merge_documents(&[&a, &b]).unwrap();
        let map = build_object_map(&merged).unwrap();
        assert_eq!(map.page_object_numbers().len(), 2);
        let text = String::from_utf8_lossy(&merged).to_string();
        assert!(text.contains("/Count 2"));
    }

    #[test]
    fn merged_pages_point_at_the_new_tree() {
        let a = one_page_pdf("A");
        let merged = merge_documents(&[&a]).unwrap();
        let map = build_object_map(&merged).unwrap();
        for page in map.page_object_numbers() {
            let body = map.get(page).unwrap();
            assert_eq!(crate::scan::dict_ref(body, "Parent"), Some(2));
        }
    }

    #[test]
    fn encrypted_input_is_refused() {
        let mut a = one_page_pdf("A");
        a.extend_from_slice(b"trailer\n<< /Encrypt 99 0 R >>\n");
        let err = merge_documents(&[&a]).unwrap_err();
        assert_eq!(err.kind_code(), "unsupported_operation");
    }

    #[test]
    fn empty_input_list_is_invalid() {
        assert!(merge_documents(&[]).is_err());
    }
}
