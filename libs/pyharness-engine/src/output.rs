use pyharness_common::protocol::TRUNCATION_MARKER;

/// Combined stdout/stderr capture with a hard byte cap.
///
/// Bytes are kept raw until the end so multi-byte characters split across
/// stream chunks decode correctly.
#[derive(Debug)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Decode lossily, then append the truncation marker and any diagnostic
    /// lines, each on its own line
    pub fn finish(self, diagnostics: &[String]) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        let mut lines: Vec<&str> = Vec::new();
        if self.truncated {
            lines.push(TRUNCATION_MARKER);
        }
        lines.extend(diagnostics.iter().map(String::as_str));

        for line in lines {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}
