//! Text family transforms

use bytes::Bytes;
use pulldown_cmark::{html, Event, Options, Parser};
use serde_json::{Map, Value};

use super::Payload;
use crate::error::FragmentError;

fn decode(data: &[u8]) -> Result<&str, FragmentError> {
    std::str::from_utf8(data)
        .map_err(|e| FragmentError::ConversionFailure(format!("Payload is not valid UTF-8: {}", e)))
}

/// Same representation in, same representation out. Stored bytes are
/// passed through untouched, UTF-8 or not.
pub fn identity(data: &[u8], _target: &'static str) -> Result<Payload, FragmentError> {
    Ok(match std::str::from_utf8(data) {
        Ok(text) => Payload::Text(text.to_string()),
        Err(_) => Payload::Binary(Bytes::copy_from_slice(data)),
    })
}

/// Plain text is the raw source text
pub fn to_plain(data: &[u8], _target: &'static str) -> Result<Payload, FragmentError> {
    Ok(Payload::Text(decode(data)?.to_string()))
}

/// GitHub-style tables and strikethrough are enabled. Raw HTML in the
/// source is escaped, never passed through.
pub fn markdown_to_html(data: &[u8], _target: &'static str) -> Result<Payload, FragmentError> {
    let text = decode(data)?;
    let parser = Parser::new_ext(text, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH)
        .map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });

    let mut rendered = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut rendered, parser);
    Ok(Payload::Text(rendered))
}

/// Header row names the fields; every following row becomes one object.
/// Cells are trimmed and blank lines skipped.
pub fn csv_to_json(data: &[u8], _target: &'static str) -> Result<Payload, FragmentError> {
    let text = decode(data)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| FragmentError::ConversionFailure(format!("Invalid CSV header: {}", e)))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| FragmentError::ConversionFailure(format!("Invalid CSV: {}", e)))?;
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(name, cell)| (name.to_string(), Value::String(cell.to_string())))
            .collect();
        rows.push(Value::Object(row));
    }

    Ok(Payload::Text(serde_json::to_string_pretty(&Value::Array(rows))?))
}

pub fn yaml_to_json(data: &[u8], _target: &'static str) -> Result<Payload, FragmentError> {
    let value: Value = serde_yaml::from_str(decode(data)?)
        .map_err(|e| FragmentError::ConversionFailure(format!("Invalid YAML: {}", e)))?;
    Ok(Payload::Text(serde_json::to_string_pretty(&value)?))
}

pub fn json_to_yaml(data: &[u8], _target: &'static str) -> Result<Payload, FragmentError> {
    let value: Value = serde_json::from_str(decode(data)?)
        .map_err(|e| FragmentError::ConversionFailure(format!("Invalid JSON: {}", e)))?;
    let yaml = serde_yaml::to_string(&value)
        .map_err(|e| FragmentError::ConversionFailure(format!("YAML encoding failed: {}", e)))?;
    Ok(Payload::Text(yaml))
}
