//! Line-prefixed output multiplexing.
//!
//! Every child process gets two `PrefixedWriter`s (stdout and stderr) that
//! forward its output to the supervisor's own streams, inserting a colored
//! `"<name> | "` label at the start of every line. Prefixing is driven by a
//! single `pending_newline` flag so that lines split across reads, or several
//! lines delivered in one read, are labeled exactly once.

use std::io::{self, Write};

use crossterm::style::{style, Color, Stylize};
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 8 * 1024;

/// Renders the label shown before each line, colored when `color` is set.
pub fn render_prefix(label: &str, color: Option<Color>) -> String {
    match color {
        Some(color) => style(label).with(color).to_string(),
        None => label.to_string(),
    }
}

/// Wraps a sink so every line written through it starts with a prefix.
pub struct PrefixedWriter<W> {
    prefix: Vec<u8>,
    pending_newline: bool,
    buf: Vec<u8>,
    sink: W,
}

impl<W: Write> PrefixedWriter<W> {
    /// Creates a writer labeling lines with `label` in the given color.
    pub fn new(label: &str, color: Option<Color>, sink: W) -> Self {
        Self::with_prefix(render_prefix(label, color), sink)
    }

    /// Creates a writer with an already rendered prefix.
    pub fn with_prefix(prefix: impl Into<String>, sink: W) -> Self {
        Self {
            prefix: prefix.into().into_bytes(),
            pending_newline: true,
            buf: Vec::new(),
            sink,
        }
    }

    #[cfg(test)]
    pub fn get_ref(&self) -> &W {
        &self.sink
    }
}

impl<W: Write> Write for PrefixedWriter<W> {
    /// Reports the whole payload as consumed on success, even though the sink
    /// received more bytes than that because of the inserted prefixes.
    fn write(&mut self, payload: &[u8]) -> io::Result<usize> {
        if payload.is_empty() {
            return Ok(0);
        }
        self.buf.clear();
        for &byte in payload {
            if self.pending_newline {
                self.buf.extend_from_slice(&self.prefix);
                self.pending_newline = false;
            }
            self.buf.push(byte);
            if byte == b'\n' {
                self.pending_newline = true;
            }
        }
        // One sink write per call keeps concurrent writers from interleaving mid-chunk.
        self.sink.write_all(&self.buf)?;
        Ok(payload.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Drains `reader` into `writer` chunk by chunk until end of stream.
pub async fn forward<R, W>(mut reader: R, writer: &mut PrefixedWriter<W>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&chunk[..n])?;
        writer.flush()?;
    }
}
