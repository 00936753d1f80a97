//! Streaming line reader over LZMA-compressed bytes.
//!
//! Host daemon logs are rotated into `.xz` members that can be far larger than
//! the memory we want to spend on them, so decompression happens one chunk at
//! a time and only the text after the last returned newline stays buffered.

use std::io::{self, BufRead, Read};
use std::ops::Range;

use xz2::stream::{Action, Status, Stream};

/// Default number of compressed bytes read per refill.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Most decompressed bytes produced by one decoder call.
const OUTPUT_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Input may still produce text.
    NeedsInput,
    /// Input is finished; only `pending` remains.
    Drained,
    /// Terminal: every line has been returned.
    Exhausted,
}

/// Iterator over the lines of an LZMA (`.xz` or legacy `.lzma`) stream.
///
/// Lines are returned without their `\n` terminator. A read or decompression
/// error ends the iteration early: whatever was decoded up to that point is
/// still returned, and the error is logged rather than raised.
///
/// Decoding stops as soon as a full line is buffered, so however well the
/// input compresses, at most one output chunk sits beyond the current line.
pub struct LzmaLines<R> {
    reader: R,
    stream: Stream,
    chunk: Vec<u8>,
    /// Compressed bytes of `chunk` not yet fed to the decoder.
    unread: Range<usize>,
    /// The reader hit end of file.
    eof: bool,
    output: Vec<u8>,
    pending: Vec<u8>,
    state: State,
}

impl<R: Read> LzmaLines<R> {
    pub fn new(reader: R) -> io::Result<Self> {
        Self::with_chunk_size(reader, DEFAULT_CHUNK_SIZE)
    }

    /// Creates a reader that pulls `chunk_size` compressed bytes per refill.
    pub fn with_chunk_size(reader: R, chunk_size: usize) -> io::Result<Self> {
        let stream = Stream::new_auto_decoder(u64::MAX, 0).map_err(io::Error::other)?;
        Ok(Self {
            reader,
            stream,
            chunk: vec![0; chunk_size.max(1)],
            unread: 0..0,
            eof: false,
            output: vec![0; OUTPUT_CHUNK_SIZE],
            pending: Vec::new(),
            state: State::NeedsInput,
        })
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        let newline = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
        line.pop();
        Some(into_text(line))
    }

    /// Runs the decoder once, appending at most one output chunk to `pending`.
    ///
    /// A new compressed chunk is read only once the previous one is fully
    /// consumed.
    fn refill(&mut self) {
        if self.unread.is_empty() && !self.eof {
            match self.reader.read(&mut self.chunk) {
                Ok(0) => self.eof = true,
                Ok(read) => self.unread = 0..read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => return,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read compressed stream, truncating");
                    self.state = State::Drained;
                    return;
                }
            }
        }

        let action = if self.eof { Action::Finish } else { Action::Run };
        let input = &self.chunk[self.unread.clone()];
        let in_before = self.stream.total_in();
        let out_before = self.stream.total_out();

        let status = match self.stream.process(input, &mut self.output, action) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(error = %err, "corrupt compressed stream, truncating");
                self.state = State::Drained;
                return;
            }
        };

        let consumed = usize::try_from(self.stream.total_in() - in_before)
            .unwrap_or(input.len())
            .min(input.len());
        let produced = usize::try_from(self.stream.total_out() - out_before)
            .unwrap_or(self.output.len())
            .min(self.output.len());
        self.unread.start += consumed;
        self.pending.extend_from_slice(&self.output[..produced]);

        if matches!(status, Status::StreamEnd) {
            self.state = State::Drained;
        } else if consumed == 0 && produced == 0 {
            if self.eof {
                tracing::warn!("compressed stream ended unexpectedly, truncating");
            } else {
                tracing::warn!("compressed stream stalled, truncating");
            }
            self.state = State::Drained;
        }
    }
}

impl<R: Read> Iterator for LzmaLines<R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if self.state == State::Exhausted {
                return None;
            }
            if let Some(line) = self.take_buffered_line() {
                return Some(line);
            }
            if self.state == State::Drained {
                self.state = State::Exhausted;
                if self.pending.is_empty() {
                    return None;
                }
                return Some(into_text(std::mem::take(&mut self.pending)));
            }
            self.refill();
        }
    }
}

/// Iterator over the lines of any buffered reader.
///
/// Invalid UTF-8 is replaced rather than rejected, and an I/O error ends the
/// stream (logged) instead of surfacing mid-walk.
pub struct ReaderLines<R> {
    reader: R,
    done: bool,
}

impl<R: BufRead> ReaderLines<R> {
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for ReaderLines<R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                Some(into_text(buf))
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to read log stream, truncating");
                self.done = true;
                None
            }
        }
    }
}

fn into_text(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}
