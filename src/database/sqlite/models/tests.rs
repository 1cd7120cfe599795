use super::*;
use serde_json::json;

fn row(metadata: &str, embedding: &str) -> DocumentRow {
    DocumentRow {
        id: 7,
        content: "Rust is a systems language.".to_string(),
        metadata: metadata.to_string(),
        embedding: embedding.to_string(),
        created_at: Utc::now(),
    }
}

#[test]
fn row_converts_to_document() {
    let document = Document::try_from(row(r#"{"source":"notes"}"#, "[0.5,-0.25,1.0]"))
        .expect("valid row");

    assert_eq!(document.id, 7);
    assert_eq!(document.metadata.get("source"), Some(&json!("notes")));
    assert_eq!(document.embedding, vec![0.5, -0.25, 1.0]);
}

#[test]
fn corrupt_embedding_is_rejected() {
    assert!(Document::try_from(row("{}", "not json")).is_err());
    assert!(Document::try_from(row("[1]", "[0.1]")).is_err());
}

#[test]
fn preview_truncates() {
    let mut document = Document::try_from(row("{}", "[1.0]")).expect("valid row");
    assert_eq!(document.preview(100), "Rust is a systems language.");
    assert_eq!(document.preview(4), "Rust...");

    document.content = "first\nsecond".to_string();
    assert_eq!(document.preview(100), "first...");
}
