use bytes::BytesMut;

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// value of the `event` field, None for unnamed events
    pub event: Option<String>,
    /// joined `data` lines
    pub data: String,
}

/// Incremental server-sent-events parser, fed with raw transport chunks.
///
/// Implements the text/event-stream line protocol: `data` lines accumulate
/// and are joined with `\n`, a blank line dispatches the pending event,
/// comment lines (leading `:`) are ignored, `id`/`retry` fields are skipped.
/// Partial lines and multi-byte characters split across chunks are held in
/// the buffer until complete.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: BytesMut,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl FrameParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk, returning every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();

        while let Some(line) = self.take_line() {
            if let Some(frame) = self.handle_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;

        let mut line = self.buffer.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }

        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn handle_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                // event boundary without data, nothing to dispatch
                self.event = None;
                return None;
            }

            let frame = Frame {
                event: self.event.take(),
                data: self.data_lines.join("\n"),
            };
            self.data_lines.clear();

            return Some(frame);
        }

        if line.starts_with(':') {
            log::trace!("Ignore comment line");
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" | "retry" => log::trace!("Ignore {} field", field),
            _ => log::trace!("Ignore unknown field {}", field),
        }

        None
    }
}
