//! CSV decoding.
//!
//! Fields may be separated by `,`, `;` or tabs; the separator is picked from
//! the first line.

use foundation::{DataRange, Feature, Properties};
use serde_json::{Value, json};

use crate::loader::LoadError;
use crate::source::{CsvColumn, CsvOptions};

const DELIMITERS: [u8; 3] = [b',', b';', b'\t'];

/// Decodes CSV text into one feature per row.
///
/// Rows without an id column value get `<range key>#<row>`; every feature is
/// tagged with `range`.
pub fn decode_csv(
    text: &str,
    options: &CsvOptions,
    range: Option<DataRange>,
) -> Result<Vec<Feature>, LoadError> {
    decode_csv_at(text, options, range, "inline")
}

pub(crate) fn decode_csv_at(
    text: &str,
    options: &CsvOptions,
    range: Option<DataRange>,
    location: &str,
) -> Result<Vec<Feature>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(text))
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let invalid = |e: csv::Error| LoadError::Decode {
        location: location.to_string(),
        reason: e.to_string(),
    };
    let mut records = reader.records();
    let headers: Vec<String> = if options.no_header {
        Vec::new()
    } else {
        match records.next() {
            Some(record) => record.map_err(invalid)?.iter().map(str::to_string).collect(),
            None => return Ok(Vec::new()),
        }
    };

    let prefix = DataRange::key_of(range.as_ref());
    records
        .enumerate()
        .map(|(index, record)| {
            let record = record.map_err(invalid)?;
            Ok(row_feature(&headers, &record, options, range, format!("{prefix}#{index}")))
        })
        .collect()
}

fn row_feature(
    headers: &[String],
    record: &csv::StringRecord,
    options: &CsvOptions,
    range: Option<DataRange>,
    fallback_id: String,
) -> Feature {
    let matches = |column: &Option<CsvColumn>, header: Option<&str>, index: usize| {
        column.as_ref().is_some_and(|c| c.matches(header, index))
    };

    let mut id = None;
    let mut lat = None;
    let mut lng = None;
    let mut properties = Properties::new();
    for (index, value) in record.iter().enumerate() {
        let header = headers.get(index).map(String::as_str).filter(|h| !h.is_empty());
        if matches(&options.id_column, header, index) {
            id = Some(value.to_string()).filter(|id| !id.is_empty());
        } else if matches(&options.lat_column, header, index) {
            lat = coordinate(value);
        } else if matches(&options.lng_column, header, index) {
            lng = coordinate(value);
        } else if let Some(header) = header {
            properties.insert(header.to_string(), Value::String(value.to_string()));
        }
    }

    Feature {
        id: id.unwrap_or(fallback_id),
        geometry: lat
            .zip(lng)
            .map(|(lat, lng)| json!({ "type": "Point", "coordinates": [lng, lat] })),
        properties,
        range,
    }
}

fn coordinate(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// The candidate separator seen most often on the first line, `,` on a tie.
fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or_default().as_bytes();
    let count = |d: u8| first_line.iter().filter(|b| **b == d).count();
    DELIMITERS
        .into_iter()
        .rev()
        .max_by_key(|d| count(*d))
        .filter(|d| count(*d) > 0)
        .unwrap_or(b',')
}
