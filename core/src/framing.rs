/// Splits a byte stream into newline-terminated lines.
#[derive(Debug, Default)]
pub struct LineParser {
    buffer: Vec<u8>,
}

impl LineParser {
    /// Feed a chunk and drain every complete line, without the terminator.
    /// Blank lines are skipped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();

        while let Some(split) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=split).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r');
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }

        lines
    }

    /// Bytes received after the last newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Take whatever unterminated tail is left once the source is exhausted.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.iter().all(|byte| byte.is_ascii_whitespace()) {
            self.buffer.clear();
            return None;
        }
        let tail = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(tail)
    }
}

/// Incremental parser for `text/event-stream` bodies.
///
/// Yields the joined `data:` payload of each event; `[DONE]` sentinels and
/// events without data are skipped.
#[derive(Debug, Default)]
pub struct SseParser {
    lines: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.lines.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(split) = self.lines.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.lines.drain(..=split).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if let Some(payload) = self.dispatch() {
                    payloads.push(payload);
                }
                continue;
            }

            if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.trim().to_string());
            }
        }

        payloads
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.data.is_empty() && self.lines.iter().all(|byte| byte.is_ascii_whitespace())
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        if payload.is_empty() || payload == "[DONE]" {
            None
        } else {
            Some(payload)
        }
    }
}
