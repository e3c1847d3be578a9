//! Merge, fill, and redaction round-trips over generated fixtures

use pdf_suite::pdf::generate_pdf;
use pdf_suite::scan::fill::{extract_field_names, fill_with_xfdf};
use pdf_suite::scan::{build_object_map, decoded_stream, stream_data};
use pdf_suite::template::{
    Cell, FieldKind, FormFieldSpec, Row, Table, Template, Title,
};
use pdf_suite::{
    apply_redactions, extract_text_positions, merge_documents, merge_files, MergeOptions,
    RedactionMode, TextSearch,
};
use tempfile::TempDir;

fn one_page(title: &str) -> Vec<u8> {
    generate_pdf(&Template {
        title: Some(Title {
            text: Some(title.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
    .unwrap()
}

fn form_template() -> Template {
    Template {
        tables: vec![Table {
            max_columns: 2,
            rows: vec![Row {
                cells: vec![
                    Cell {
                        field: Some(FormFieldSpec {
                            kind: FieldKind::Text,
                            name: "city".to_string(),
                            value: Some(String::new()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    Cell {
                        field: Some(FormFieldSpec {
                            kind: FieldKind::Checkbox,
                            name: "subscribe".to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

#[test]
fn merge_combines_pages_in_order() {
    let first = one_page("Document One");
    let second = one_page("Document Two");
    let merged = merge_documents(&[&first, &second]).unwrap();

    let map = build_object_map(&merged).unwrap();
    let pages = map.page_object_numbers();
    assert_eq!(pages.len(), 2);

    // Page order follows input order: page one still shows "Document One"
    let contents_of = |page: u32| -> String {
        let body = map.get(page).unwrap();
        let contents = pdf_suite::scan::dict_ref(body, "Contents").unwrap();
        let data = decoded_stream(map.get(contents).unwrap()).unwrap();
        String::from_utf8_lossy(&data).to_string()
    };
    assert!(contents_of(pages[0]).contains("(Document One) Tj"));
    assert!(contents_of(pages[1]).contains("(Document Two) Tj"));
}

#[test]
fn merge_unions_form_fields() {
    let with_form = generate_pdf(&form_template()).unwrap();
    let plain = one_page("No form here");
    let merged = merge_documents(&[&with_form, &plain]).unwrap();

    let names = extract_field_names(&merged).unwrap();
    assert!(names.contains_key("city"));
    assert!(names.contains_key("subscribe"));
    let text = String::from_utf8_lossy(&merged).to_string();
    assert!(text.contains("/AcroForm << /Fields ["));
}

#[test]
fn merge_files_round_trip_on_disk() {
    let dir = TempDir::new().unwrap();
    let a_path = dir.path().join("a.pdf");
    let b_path = dir.path().join("b.pdf");
    let out_path = dir.path().join("merged.pdf");
    std::fs::write(&a_path, one_page("A")).unwrap();
    std::fs::write(&b_path, one_page("B")).unwrap();

    merge_files(&MergeOptions {
        input_paths: vec![a_path, b_path],
        output_path: out_path.clone(),
    })
    .unwrap();

    let merged = std::fs::read(&out_path).unwrap();
    let map = build_object_map(&merged).unwrap();
    assert_eq!(map.page_object_numbers().len(), 2);
}

#[test]
fn missing_merge_input_is_reported() {
    let dir = TempDir::new().unwrap();
    let err = merge_files(&MergeOptions {
        input_paths: vec![dir.path().join("nope.pdf")],
        output_path: dir.path().join("out.pdf"),
    })
    .unwrap_err();
    assert_eq!(err.kind_code(), "missing_resource");
}

#[test]
fn xfdf_fill_round_trip() {
    let pdf = generate_pdf(&form_template()).unwrap();
    let xfdf = r#"<?xml version="1.0"?>
<xfdf xmlns="http://ns.adobe.com/xfdf/">
  <fields>
    <field name="city"><value>Lisbon</value></field>
    <field name="subscribe"><value>Yes</value></field>
  </fields>
</xfdf>"#;

    let filled = fill_with_xfdf(&pdf, xfdf).unwrap();
    let fields = extract_field_names(&filled).unwrap();
    assert_eq!(
        fields.get("city").cloned().flatten().as_deref(),
        Some("Lisbon")
    );
    assert_eq!(
        fields.get("subscribe").cloned().flatten().as_deref(),
        Some("Yes")
    );

    // The filled value has a regenerated appearance
    let text = String::from_utf8_lossy(&filled).to_string();
    assert!(text.contains("(Lisbon) Tj"));
    assert!(text.contains("/NeedAppearances false"));
}

#[test]
fn text_positions_from_generated_output() {
    let pdf = one_page("Findable Title");
    let positions = extract_text_positions(&pdf, 1).unwrap();
    // Title plus the page-number stamp
    assert!(positions.iter().any(|p| p.text == "Findable Title"));
    assert!(positions.iter().any(|p| p.text == "Page 1 of 1"));
    for p in &positions {
        assert!(p.width > 0.0);
        assert!(p.height > 0.0);
    }
}

#[test]
fn secure_redaction_end_to_end() {
    let pdf = one_page("Hello World");
    let (out, report) = apply_redactions(
        &pdf,
        &[],
        &[TextSearch {
            text: "World".to_string(),
        }],
        RedactionMode::SecureRequired,
    )
    .unwrap();

    assert_eq!(report.matched_text, 1);
    assert_eq!(report.applied_rects, 1);
    assert!(report.pages.iter().all(|p| p.rewritable));

    let map = build_object_map(&out).unwrap();
    let page = map.page_object_numbers()[0];
    let page_body = map.get(page).unwrap();
    let page_text = String::from_utf8_lossy(page_body).to_string();
    // Overlay stream appended to /Contents
    assert!(page_text.contains("/Contents ["));

    // The rewritten stream keeps the run's character count, spaces where
    // the match was, and a /Length that matches the re-compressed bytes
    let contents = pdf_suite::scan::dict_ref(page_body, "Contents")
        .or_else(|| {
            // Array form: take the first reference
            let text = String::from_utf8_lossy(page_body).to_string();
            let at = text.find("/Contents [").unwrap();
            text[at + 11..]
                .split_whitespace()
                .next()
                .and_then(|t| t.parse().ok())
        })
        .unwrap();
    let stream_body = map.get(contents).unwrap();
    let data = decoded_stream(stream_body).unwrap();
    let text = String::from_utf8_lossy(&data).to_string();
    assert!(text.contains("(Hello      ) Tj"));
    assert!(!text.to_lowercase().contains("world"));

    let body_text = String::from_utf8_lossy(stream_body).to_string();
    let at = body_text.find("/Length ").unwrap();
    let digits: String = body_text[at + 8..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let declared: usize = digits.parse().unwrap();
    assert_eq!(stream_data(stream_body).unwrap().len(), declared);

    // Black box over the redacted region
    let full = String::from_utf8_lossy(&out).to_string();
    assert!(full.contains("0 0 0 rg"));
    assert!(full.contains("/Prev"));
}

#[test]
fn visual_redaction_keeps_streams_untouched() {
    let pdf = one_page("Keep Me Visible");
    let (out, report) = apply_redactions(
        &pdf,
        &[pdf_suite::RedactRect {
            page: 1,
            x: 72.0,
            y: 700.0,
            width: 200.0,
            height: 30.0,
        }],
        &[],
        RedactionMode::VisualAllowed,
    )
    .unwrap();
    assert_eq!(report.generated_rects, 1);
    assert_eq!(report.applied_rects, 1);

    // Original content stream object is not rewritten in visual mode;
    // its text is still recoverable (which is exactly why secure exists)
    let map = build_object_map(&out).unwrap();
    let positions = extract_text_positions(&out, 1).unwrap();
    assert!(positions.iter().any(|p| p.text.contains("Keep Me Visible")));
    assert!(map.max_object_number() > build_object_map(&pdf).unwrap().max_object_number());
}

#[test]
fn encrypted_documents_are_refused_everywhere() {
    let mut pdf = one_page("Locked");
    pdf.extend_from_slice(b"trailer\n<< /Size 9 /Root 1 0 R /Encrypt 8 0 R >>\n");

    assert_eq!(
        merge_documents(&[&pdf]).unwrap_err().kind_code(),
        "unsupported_operation"
    );
    assert_eq!(
        fill_with_xfdf(&pdf, "<xfdf/>").unwrap_err().kind_code(),
        "unsupported_operation"
    );
    assert_eq!(
        apply_redactions(&pdf, &[], &[], RedactionMode::VisualAllowed)
            .unwrap_err()
            .kind_code(),
        "unsupported_operation"
    );
}
