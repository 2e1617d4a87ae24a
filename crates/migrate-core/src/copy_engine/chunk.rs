//! Last-row tracking over a stream of `COPY ... TO STDOUT` bytes.
//!
//! Chunk boundaries from `copy_out` never align with record boundaries, so a
//! line can arrive split across two `Bytes` values. [`LineTracker`] carries
//! the trailing partial line forward and only counts/parses complete lines,
//! finishing the last partial one explicitly at EOF.

/// Rows and bytes seen so far, plus the `(key, date)` of the last complete
/// record, read as the first two CSV fields of each line.
#[derive(Debug, Default)]
pub struct ChunkProgress {
    pub rows: u64,
    pub bytes: u64,
    pub last_key: Option<String>,
    pub last_date: Option<String>,
}

pub(super) struct LineTracker {
    partial: Vec<u8>,
    rows: u64,
    bytes: u64,
    last_key: Option<String>,
    last_date: Option<String>,
}

impl LineTracker {
    pub(super) fn new() -> Self {
        Self { partial: Vec::new(), rows: 0, bytes: 0, last_key: None, last_date: None }
    }

    /// Feed raw COPY-stream bytes, counting and parsing every complete line
    /// found. Bytes that don't end in `\n` yet are carried to the next call.
    pub(super) fn feed(&mut self, data: &[u8]) {
        self.bytes += data.len() as u64;
        self.partial.extend_from_slice(data);

        loop {
            let Some(pos) = self.partial.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            self.record_line(&line);
        }
    }

    /// Call once the producer side has signalled EOF: a carried partial line
    /// with no trailing newline is still a complete record (COPY doesn't
    /// guarantee a final newline on every driver).
    pub(super) fn finish(&mut self) {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.record_line(&line);
        }
    }

    fn record_line(&mut self, line: &[u8]) {
        if line.is_empty() || line == b"\n" {
            return;
        }
        self.rows += 1;
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\n', '\r']);
        let mut fields = text.splitn(3, ',');
        self.last_key = fields.next().map(str::to_string);
        self.last_date = fields.next().map(str::to_string);
    }

    pub(super) fn into_progress(self) -> ChunkProgress {
        ChunkProgress { rows: self.rows, bytes: self.bytes, last_key: self.last_key, last_date: self.last_date }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_rows_and_last_row_across_whole_lines() {
        let mut t = LineTracker::new();
        t.feed(b"1,1700000000000,v1\n2,1700000001000,v2\n");
        t.finish();
        let p = t.into_progress();
        assert_eq!(p.rows, 2);
        assert_eq!(p.last_key.as_deref(), Some("2"));
        assert_eq!(p.last_date.as_deref(), Some("1700000001000"));
    }

    #[test]
    fn carries_a_partial_line_across_feed_calls() {
        let mut t = LineTracker::new();
        t.feed(b"1,1700000000000,v");
        t.feed(b"1\n2,1700000001000,v2\n");
        t.finish();
        let p = t.into_progress();
        assert_eq!(p.rows, 2);
        assert_eq!(p.last_key.as_deref(), Some("2"));
    }

    #[test]
    fn finish_captures_a_trailing_line_with_no_newline() {
        let mut t = LineTracker::new();
        t.feed(b"1,1700000000000,v1\n2,1700000001000,v2");
        t.finish();
        let p = t.into_progress();
        assert_eq!(p.rows, 2);
        assert_eq!(p.last_key.as_deref(), Some("2"));
    }

    #[test]
    fn empty_stream_yields_no_rows() {
        let mut t = LineTracker::new();
        t.feed(b"");
        t.finish();
        let p = t.into_progress();
        assert_eq!(p.rows, 0);
        assert!(p.last_key.is_none());
    }
}
