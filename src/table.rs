// src/table.rs
//! Post tables: CSV in, CSV out, with append-only result columns.
//!
//! Rows are kept as raw `csv::StringRecord`s so that columns this crate does not know about
//! survive the round trip untouched. Only `caption`, `timestamp`, `lat` and `lon` are
//! interpreted.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use csv::StringRecord;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::PipelineError;
use crate::shard::Shard;

pub const CAPTION_COLUMN: &str = "caption";
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const LAT_COLUMN: &str = "lat";
pub const LON_COLUMN: &str = "lon";

/// One post, as needed by the similarity scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub index: usize,
    pub caption: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostTable {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl PostTable {
    pub fn new(headers: StringRecord, rows: Vec<StringRecord>) -> Self {
        Self { headers, rows }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening table {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("reading table {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().from_reader(reader);
        let headers = rdr.headers().context("reading header row")?.clone();
        let mut rows = Vec::new();
        for (idx, rec) in rdr.records().enumerate() {
            rows.push(rec.with_context(|| format!("reading row {}", idx + 1))?);
        }
        Ok(Self { headers, rows })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("creating table {}", path.display()))?;
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()
            .with_context(|| format!("flushing table {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    /// Position of a named column.
    pub fn column(&self, name: &str) -> Result<usize, PipelineError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
    }

    /// Raw field value, `None` when the row is shorter than the header.
    pub fn field(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Drop rows whose `column` is empty or whitespace. Returns how many were removed.
    pub fn drop_missing(&mut self, column: &str) -> Result<usize, PipelineError> {
        let idx = self.column(column)?;
        let before = self.rows.len();
        self.rows
            .retain(|r| r.get(idx).is_some_and(|v| !is_missing(v)));
        Ok(before - self.rows.len())
    }

    /// Copy of the rows covered by `shard`, same header.
    pub fn slice(&self, shard: Shard) -> PostTable {
        let finish = shard.finish.min(self.rows.len());
        let start = shard.start.min(finish);
        PostTable {
            headers: self.headers.clone(),
            rows: self.rows[start..finish].to_vec(),
        }
    }

    /// Append a column; `values` must have exactly one entry per row.
    pub fn push_column<S: AsRef<str>>(&mut self, name: &str, values: &[S]) -> Result<()> {
        anyhow::ensure!(
            values.len() == self.rows.len(),
            "column `{name}` has {} values for {} rows",
            values.len(),
            self.rows.len()
        );
        self.headers.push_field(name);
        for (row, v) in self.rows.iter_mut().zip(values) {
            row.push_field(v.as_ref());
        }
        Ok(())
    }

    /// Concatenate tables that share one header, preserving part order.
    pub fn concat(parts: Vec<PostTable>) -> Result<PostTable> {
        let mut iter = parts.into_iter();
        let Some(mut first) = iter.next() else {
            anyhow::bail!("nothing to concatenate");
        };
        for part in iter {
            anyhow::ensure!(
                part.headers == first.headers,
                "cannot concatenate tables with different headers"
            );
            first.rows.extend(part.rows);
        }
        Ok(first)
    }

    /// Normalized captions of every row. A blank caption is a hard error naming the row.
    pub fn captions(&self) -> Result<Vec<String>, PipelineError> {
        let idx = self.column(CAPTION_COLUMN)?;
        (0..self.rows.len())
            .map(|row| {
                let raw = self.field(row, idx).unwrap_or_default();
                let text = normalize_caption(raw);
                if text.is_empty() {
                    Err(PipelineError::MalformedCaption { row })
                } else {
                    Ok(text)
                }
            })
            .collect()
    }

    /// Parse one row into a `Post`.
    pub fn post(&self, index: usize) -> Result<Post, PipelineError> {
        if index >= self.rows.len() {
            return Err(PipelineError::RowOutOfRange {
                index,
                len: self.rows.len(),
            });
        }
        let caption_idx = self.column(CAPTION_COLUMN)?;
        let caption = normalize_caption(self.field(index, caption_idx).unwrap_or_default());
        if caption.is_empty() {
            return Err(PipelineError::MalformedCaption { row: index });
        }
        Ok(Post {
            index,
            caption,
            timestamp: self.number(index, TIMESTAMP_COLUMN)?,
            lon: self.number(index, LON_COLUMN)?,
            lat: self.number(index, LAT_COLUMN)?,
        })
    }

    fn number(&self, row: usize, column: &str) -> Result<f64, PipelineError> {
        let idx = self.column(column)?;
        let raw = self.field(row, idx).unwrap_or_default().trim();
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| PipelineError::MalformedNumber {
                row,
                column: column.to_string(),
                value: raw.to_string(),
            })
    }
}

/// pandas writes missing values as empty fields; some exports spell them out.
fn is_missing(v: &str) -> bool {
    let t = v.trim();
    t.is_empty() || t.eq_ignore_ascii_case("nan")
}

/// Normalize a caption for embedding: decode HTML entities, fold line breaks and runs of
/// whitespace into single spaces, trim. Hashtags and punctuation are left alone.
pub fn normalize_caption(s: &str) -> String {
    if is_missing(s) {
        return String::new();
    }
    let decoded = html_escape::decode_html_entities(s);

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(&decoded, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "id,caption,timestamp,lat,lon\n\
        1,\"Great #jazz\nnight\",1600000000,40.7,-73.9\n\
        2,,1600000100,40.7,-73.9\n\
        3,Food &amp; drinks,1600000200,40.8,-73.95\n";

    fn table() -> PostTable {
        PostTable::from_reader(CSV.as_bytes()).unwrap()
    }

    #[test]
    fn drops_rows_without_caption() {
        let mut t = table();
        assert_eq!(t.drop_missing(CAPTION_COLUMN).unwrap(), 1);
        assert_eq!(t.len(), 2);
        assert_eq!(t.field(1, 0), Some("3"));
    }

    #[test]
    fn captions_are_normalized() {
        let mut t = table();
        t.drop_missing(CAPTION_COLUMN).unwrap();
        assert_eq!(
            t.captions().unwrap(),
            vec!["Great #jazz night".to_string(), "Food & drinks".to_string()]
        );
    }

    #[test]
    fn blank_caption_names_the_row() {
        let t = table();
        assert!(matches!(
            t.captions(),
            Err(PipelineError::MalformedCaption { row: 1 })
        ));
    }

    #[test]
    fn post_parses_numeric_columns() {
        let t = table();
        let p = t.post(2).unwrap();
        assert_eq!(p.timestamp, 1_600_000_200.0);
        assert_eq!(p.lat, 40.8);
        assert_eq!(p.lon, -73.95);
        assert!(matches!(
            t.post(9),
            Err(PipelineError::RowOutOfRange { index: 9, len: 3 })
        ));
    }

    #[test]
    fn slice_push_and_concat_keep_order() {
        let t = table();
        let mut a = t.slice(Shard::new(0, 2));
        let mut b = t.slice(Shard::new(2, 3));
        a.push_column("flag", &["1", "0"]).unwrap();
        b.push_column("flag", &["1"]).unwrap();
        let all = PostTable::concat(vec![a, b]).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.headers().get(5), Some("flag"));
        let ids: Vec<_> = all.rows().iter().map(|r| r.get(0).unwrap().to_string()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn push_column_rejects_wrong_length() {
        let mut t = table();
        assert!(t.push_column("flag", &["1"]).is_err());
    }

    #[test]
    fn missing_column_is_reported() {
        let t = PostTable::from_reader("a,b\n1,2\n".as_bytes()).unwrap();
        assert!(matches!(
            t.captions(),
            Err(PipelineError::MissingColumn(c)) if c == "caption"
        ));
    }
}
