//! Delimiter and encoding detection, header extraction, and the cheap
//! row-count estimate.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tally_core::constants::{DELIMITER_CANDIDATES, ESTIMATE_SIZE_CAP, SNIFF_BYTES};
use tally_core::errors::ReadError;

use super::stream;

/// Input text encoding. UTF-8 is tried first; Latin-1 never fails, so
/// it is the fallback when the sniffed head contains invalid UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

/// Everything the engine needs to read a file, established once per
/// side at the start of a run.
#[derive(Debug, Clone)]
pub struct FileProfile {
    pub path: PathBuf,
    pub delimiter: u8,
    pub encoding: TextEncoding,
    pub header: Vec<String>,
    pub byte_size: u64,
    /// Data rows (header excluded). Estimated for small files, exact
    /// (linear newline scan) above the size cap.
    pub row_count_estimate: u64,
    /// True when `row_count_estimate` came from the byte-length
    /// heuristic rather than a scan.
    pub estimated: bool,
}

impl FileProfile {
    /// Detect delimiter and encoding from the first 64 KiB, extract the
    /// header, and estimate the row count.
    pub fn detect(path: &Path) -> Result<Self, ReadError> {
        let mut file = File::open(path).map_err(|e| ReadError::io(path, e))?;
        let byte_size = file
            .metadata()
            .map_err(|e| ReadError::io(path, e))?
            .len();

        let mut head = vec![0u8; SNIFF_BYTES];
        let mut filled = 0;
        loop {
            let n = file
                .read(&mut head[filled..])
                .map_err(|e| ReadError::io(path, e))?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled == head.len() {
                break;
            }
        }
        head.truncate(filled);

        if head.is_empty() {
            return Err(ReadError::SchemaEmpty {
                path: path.display().to_string(),
            });
        }

        let encoding = if std::str::from_utf8(&head).is_ok() {
            TextEncoding::Utf8
        } else {
            TextEncoding::Latin1
        };
        let text = decode(&head, encoding);

        // Only complete lines vote on the delimiter; a line cut off by
        // the sniff window would skew field counts.
        let mut lines: Vec<&str> = text.lines().collect();
        if !text.ends_with('\n') && lines.len() > 1 {
            lines.pop();
        }
        if lines.is_empty() || lines[0].trim().is_empty() {
            return Err(ReadError::SchemaEmpty {
                path: path.display().to_string(),
            });
        }

        let delimiter = detect_delimiter(&lines);
        let header = parse_header(lines[0], delimiter);
        if header.is_empty() || header.iter().all(|h| h.trim().is_empty()) {
            return Err(ReadError::SchemaEmpty {
                path: path.display().to_string(),
            });
        }

        let (row_count_estimate, estimated) =
            estimate_rows(path, byte_size, &lines, filled as u64)?;

        Ok(Self {
            path: path.to_path_buf(),
            delimiter,
            encoding,
            header,
            byte_size,
            row_count_estimate,
            estimated,
        })
    }

    /// Index of a header column, by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Indices for a set of columns; `None` if any is missing.
    pub fn column_indices(&self, names: &[String]) -> Option<Vec<usize>> {
        names.iter().map(|n| self.column_index(n)).collect()
    }
}

/// Score each candidate by how consistently it splits the sniffed
/// lines into more than one field. Ties break in candidate order.
fn detect_delimiter(lines: &[&str]) -> u8 {
    let mut best = DELIMITER_CANDIDATES[0];
    let mut best_score = 0u64;

    for &cand in &DELIMITER_CANDIDATES {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| field_count(line, cand))
            .collect();
        let first = counts[0];
        if first < 2 {
            continue;
        }
        let consistent = counts.iter().filter(|&&c| c == first).count();
        // All-lines-consistent dominates; wider rows win among equals.
        let score = (consistent as u64) * 1000 + first as u64;
        if score > best_score {
            best_score = score;
            best = cand;
        }
    }
    best
}

/// Fields a line would split into, respecting double quotes.
fn field_count(line: &str, delimiter: u8) -> usize {
    let mut count = 1;
    let mut in_quotes = false;
    for b in line.bytes() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b if b == delimiter && !in_quotes => count += 1,
            _ => {}
        }
    }
    count
}

fn parse_header(line: &str, delimiter: u8) -> Vec<String> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_reader(line.as_bytes());
    match rdr.records().next() {
        Some(Ok(record)) => record.iter().map(|f| f.trim().to_string()).collect(),
        _ => Vec::new(),
    }
}

/// Below the size cap, bytes / average sniffed line length is good
/// enough. Above it a linear scan is mandatory before any sampling
/// decision, so do it now.
fn estimate_rows(
    path: &Path,
    byte_size: u64,
    lines: &[&str],
    sniffed_bytes: u64,
) -> Result<(u64, bool), ReadError> {
    if byte_size > ESTIMATE_SIZE_CAP {
        return Ok((stream::count_lines(path)?.saturating_sub(1), false));
    }
    if byte_size <= sniffed_bytes {
        // Whole file fit in the sniff window: the line count is exact.
        return Ok((lines.len().saturating_sub(1) as u64, false));
    }
    let avg_line = sniffed_bytes.max(1) / lines.len().max(1) as u64;
    let estimate = (byte_size / avg_line.max(1)).saturating_sub(1);
    Ok((estimate, true))
}

pub(super) fn decode(bytes: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        TextEncoding::Latin1 => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    #[test]
    fn detects_comma_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.csv", b"id,name\n1,a\n2,b\n");
        let p = FileProfile::detect(&path).unwrap();
        assert_eq!(p.delimiter, b',');
        assert_eq!(p.encoding, TextEncoding::Utf8);
        assert_eq!(p.header, vec!["id", "name"]);
        assert_eq!(p.row_count_estimate, 2);
        assert!(!p.estimated);
    }

    #[test]
    fn detects_tab_and_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let tab = write_file(&dir, "t.tsv", b"id\tname\n1\ta\n");
        assert_eq!(FileProfile::detect(&tab).unwrap().delimiter, b'\t');
        let pipe = write_file(&dir, "p.csv", b"id|name\n1|a\n");
        assert_eq!(FileProfile::detect(&pipe).unwrap().delimiter, b'|');
    }

    #[test]
    fn comma_wins_ties_in_candidate_order() {
        let dir = tempfile::tempdir().unwrap();
        // Both comma and semicolon split every line into two fields.
        let path = write_file(&dir, "tie.csv", b"a;x,b\n1;2,3\n");
        assert_eq!(FileProfile::detect(&path).unwrap().delimiter, b',');
    }

    #[test]
    fn quoted_delimiters_do_not_vote() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "q.csv", b"id,note\n1,\"a,b,c\"\n2,\"d,e\"\n");
        let p = FileProfile::detect(&path).unwrap();
        assert_eq!(p.delimiter, b',');
        assert_eq!(p.header.len(), 2);
    }

    #[test]
    fn latin1_fallback() {
        let dir = tempfile::tempdir().unwrap();
        // 0xE9 is 'é' in Latin-1 and invalid UTF-8.
        let path = write_file(&dir, "l.csv", b"id,caf\xe9\n1,x\n");
        let p = FileProfile::detect(&path).unwrap();
        assert_eq!(p.encoding, TextEncoding::Latin1);
        assert_eq!(p.header[1], "café");
    }

    #[test]
    fn empty_file_is_schema_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "e.csv", b"");
        assert!(matches!(
            FileProfile::detect(&path),
            Err(ReadError::SchemaEmpty { .. })
        ));
    }

    #[test]
    fn missing_file_is_file_not_found() {
        assert!(matches!(
            FileProfile::detect(Path::new("/nonexistent/x.csv")),
            Err(ReadError::FileNotFound { .. })
        ));
    }
}
