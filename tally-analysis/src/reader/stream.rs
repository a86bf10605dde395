//! Single-pass row streaming and exact line counting.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use tally_core::constants::KEY_SEPARATOR;
use tally_core::errors::ReadError;

use super::detect::{decode, FileProfile, TextEncoding};
use super::Row;

/// A finite, single-pass stream of decoded rows. Reopen to restart.
///
/// Rows with a field count different from the header are "bad lines":
/// skipped, with `bad_lines()` counting them. Field values are decoded
/// per the profile encoding and normalized so the key separator can
/// never appear inside a value.
pub struct RowStream {
    reader: csv::Reader<File>,
    record: csv::ByteRecord,
    path: std::path::PathBuf,
    encoding: TextEncoding,
    expected_fields: usize,
    projection: Option<Vec<usize>>,
    bad_lines: u64,
    rows_read: u64,
}

impl RowStream {
    /// Open a stream over all columns.
    pub fn open(profile: &FileProfile) -> Result<Self, ReadError> {
        Self::open_projected(profile, None)
    }

    /// Open a stream projected to the given columns, in the given
    /// order. Unknown columns are a caller bug surfaced as `Unreadable`.
    pub fn open_projected(
        profile: &FileProfile,
        columns: Option<&[String]>,
    ) -> Result<Self, ReadError> {
        let projection = match columns {
            None => None,
            Some(names) => Some(profile.column_indices(names).ok_or_else(|| {
                ReadError::Unreadable {
                    path: profile.path.display().to_string(),
                    message: "projected column not present in header".to_string(),
                }
            })?),
        };

        let file = File::open(&profile.path).map_err(|e| ReadError::io(&profile.path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(profile.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        // Skip the header record.
        let mut record = csv::ByteRecord::new();
        reader
            .read_byte_record(&mut record)
            .map_err(|e| csv_err(&profile.path, e))?;

        Ok(Self {
            reader,
            record: csv::ByteRecord::new(),
            path: profile.path.clone(),
            encoding: profile.encoding,
            expected_fields: profile.header.len(),
            projection,
            bad_lines: 0,
            rows_read: 0,
        })
    }

    /// Lines skipped so far because their field count did not match the
    /// header or their bytes would not decode.
    pub fn bad_lines(&self) -> u64 {
        self.bad_lines
    }

    /// Rows yielded so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn decode_field(&self, bytes: &[u8]) -> String {
        let value = decode(bytes, self.encoding);
        normalize_field(value)
    }

    fn next_inner(&mut self) -> Option<Result<Row, ReadError>> {
        loop {
            match self.reader.read_byte_record(&mut self.record) {
                Ok(false) => return None,
                Ok(true) => {
                    if self.record.len() != self.expected_fields {
                        self.bad_lines += 1;
                        continue;
                    }
                    if self.encoding == TextEncoding::Utf8
                        && self.record.iter().any(|f| std::str::from_utf8(f).is_err())
                    {
                        self.bad_lines += 1;
                        continue;
                    }
                    let row: Row = match &self.projection {
                        None => self.record.iter().map(|f| self.decode_field(f)).collect(),
                        Some(indices) => indices
                            .iter()
                            .map(|&i| self.decode_field(&self.record[i]))
                            .collect(),
                    };
                    self.rows_read += 1;
                    return Some(Ok(row));
                }
                Err(e) => {
                    // An unparseable record is a bad line; a hard read
                    // error underneath it is fatal.
                    if e.is_io_error() {
                        return Some(Err(ReadError::Io {
                            path: self.path.display().to_string(),
                            message: e.to_string(),
                        }));
                    }
                    self.bad_lines += 1;
                    continue;
                }
            }
        }
    }
}

impl Iterator for RowStream {
    type Item = Result<Row, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_inner()
    }
}

/// Strip characters that collide with internal sentinels. They cannot
/// occur in legitimate tabular data.
fn normalize_field(value: String) -> String {
    if value
        .chars()
        .any(|c| c == KEY_SEPARATOR || c == '\u{1}' || c == '\u{3}')
    {
        value
            .chars()
            .filter(|&c| c != KEY_SEPARATOR && c != '\u{1}' && c != '\u{3}')
            .collect()
    } else {
        value
    }
}

/// Count physical lines with a buffered byte scan — no field parsing.
pub fn count_lines(path: &Path) -> Result<u64, ReadError> {
    let file = File::open(path).map_err(|e| ReadError::io(path, e))?;
    let mut reader = BufReader::with_capacity(1 << 20, file);
    let mut count = 0u64;
    let mut last_byte = b'\n';
    loop {
        let buf = reader.fill_buf().map_err(|e| ReadError::io(path, e))?;
        if buf.is_empty() {
            break;
        }
        count += buf.iter().filter(|&&b| b == b'\n').count() as u64;
        last_byte = buf[buf.len() - 1];
        let len = buf.len();
        reader.consume(len);
    }
    if last_byte != b'\n' {
        count += 1;
    }
    Ok(count)
}

/// Exact data-row count: parsed records minus bad lines, header
/// excluded. One cheap pass; fields are not decoded.
pub fn count_rows(profile: &FileProfile) -> Result<u64, ReadError> {
    let file = File::open(&profile.path).map_err(|e| ReadError::io(&profile.path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(profile.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut record = csv::ByteRecord::new();
    // Header.
    reader
        .read_byte_record(&mut record)
        .map_err(|e| csv_err(&profile.path, e))?;

    let mut count = 0u64;
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                if record.len() == profile.header.len() {
                    count += 1;
                }
            }
            Err(e) if e.is_io_error() => return Err(csv_err(&profile.path, e)),
            Err(_) => continue,
        }
    }
    Ok(count)
}

fn csv_err(path: &Path, e: csv::Error) -> ReadError {
    ReadError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn profile_for(content: &[u8]) -> (tempfile::TempDir, FileProfile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        File::create(&path).unwrap().write_all(content).unwrap();
        let p = FileProfile::detect(&path).unwrap();
        (dir, p)
    }

    #[test]
    fn streams_all_rows_in_order() {
        let (_d, p) = profile_for(b"id,name\n1,a\n2,b\n3,c\n");
        let rows: Vec<Row> = RowStream::open(&p).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["1", "a"]);
        assert_eq!(rows[2], vec!["3", "c"]);
    }

    #[test]
    fn projection_reorders_columns() {
        let (_d, p) = profile_for(b"id,name,city\n1,a,ny\n");
        let cols = vec!["city".to_string(), "id".to_string()];
        let rows: Vec<Row> = RowStream::open_projected(&p, Some(&cols))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows[0], vec!["ny", "1"]);
    }

    #[test]
    fn ragged_rows_are_skipped_and_counted() {
        let (_d, p) = profile_for(b"id,name\n1,a\nbroken\n2,b\n");
        let mut stream = RowStream::open(&p).unwrap();
        let rows: Vec<Row> = stream.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(stream.bad_lines(), 1);
    }

    #[test]
    fn count_rows_matches_stream() {
        let (_d, p) = profile_for(b"id,name\n1,a\nbroken\n2,b\n3,c\n");
        assert_eq!(count_rows(&p).unwrap(), 3);
    }

    #[test]
    fn count_lines_handles_missing_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("n.csv");
        File::create(&path).unwrap().write_all(b"a\nb\nc").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 3);
    }

    #[test]
    fn quoted_newlines_stay_in_one_record() {
        let (_d, p) = profile_for(b"id,note\n1,\"line1\nline2\"\n2,plain\n");
        let rows: Vec<Row> = RowStream::open(&p).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], "line1\nline2");
    }
}
