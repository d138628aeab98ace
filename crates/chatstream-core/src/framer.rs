/// Splits a chunked byte stream into complete `\n`-terminated lines.
///
/// The residual after the last separator is carried into the next `feed`
/// call. Splitting happens on raw bytes, so a multi-byte character cut in
/// half by the transport is put back together before it is decoded.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    /// Appends `chunk` and returns every line completed by it, in order.
    ///
    /// Returned lines do not include the `\n` separator.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let Some(last_sep) = self.buf.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.buf.drain(..=last_sep).collect();
        complete[..complete.len() - 1]
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// String convenience over [`LineFramer::feed`].
    pub fn feed_str(&mut self, chunk: &str) -> Vec<String> {
        self.feed(chunk.as_bytes())
    }

    /// Bytes currently held back waiting for a separator.
    pub fn residual_len(&self) -> usize {
        self.buf.len()
    }

    /// Ends framing. An unterminated trailing line is dropped; its length is
    /// returned so the caller can log it.
    pub fn finish(self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_complete_lines_and_keeps_partial() {
        let mut framer = LineFramer::default();
        assert_eq!(framer.feed_str("data: a\ndata: b"), vec!["data: a"]);
        assert_eq!(framer.residual_len(), "data: b".len());
        assert_eq!(framer.feed_str("\n"), vec!["data: b"]);
        assert_eq!(framer.residual_len(), 0);
    }

    #[test]
    fn preserves_empty_lines_between_events() {
        let mut framer = LineFramer::default();
        assert_eq!(
            framer.feed_str("data: a\n\ndata: b\n\n"),
            vec!["data: a", "", "data: b", ""]
        );
    }

    #[test]
    fn chunk_without_separator_emits_nothing() {
        let mut framer = LineFramer::default();
        assert!(framer.feed_str("data: {\"type\"").is_empty());
        assert!(framer.feed_str(":\"end\"}").is_empty());
        assert_eq!(framer.feed_str("\n"), vec!["data: {\"type\":\"end\"}"]);
    }

    #[test]
    fn every_split_point_yields_the_same_lines() {
        let input = "data: {\"type\":\"content\",\"content\":\"A\"}\ndata: {\"type\":\"content\",\"content\":\"B\"}\n";
        let expected = LineFramer::default().feed_str(input);
        for split in 0..=input.len() {
            let mut framer = LineFramer::default();
            let mut lines = framer.feed(&input.as_bytes()[..split]);
            lines.extend(framer.feed(&input.as_bytes()[split..]));
            assert_eq!(lines, expected, "split at byte {split}");
        }
    }

    #[test]
    fn multibyte_character_split_across_chunks_is_reassembled() {
        let bytes = "data: héllo\n".as_bytes();
        let cut = "data: h".len() + 1;
        let mut framer = LineFramer::default();
        assert!(framer.feed(&bytes[..cut]).is_empty());
        assert_eq!(framer.feed(&bytes[cut..]), vec!["data: héllo"]);
    }

    #[test]
    fn finish_reports_discarded_residual() {
        let mut framer = LineFramer::default();
        framer.feed_str("data: {\"type\":\"end\"}");
        assert_eq!(framer.finish(), "data: {\"type\":\"end\"}".len());
    }
}
