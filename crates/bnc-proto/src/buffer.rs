//! Delimited framing for byte streams.
//!
//! [`DelimitedDataBuffer`] turns an arbitrary sequence of socket reads into
//! complete, delimiter-terminated messages. Incomplete tails are carried
//! over between reads, so a line split across two TCP segments comes out
//! whole.
//!
//! ```
//! use bnc_proto::buffer::DelimitedDataBuffer;
//!
//! let mut buf = DelimitedDataBuffer::new();
//! buf.receive(b"PING :a\r\nPI");
//! buf.receive(b"NG :b\r\n");
//! assert_eq!(buf.consume_all(), vec!["PING :a\r", "PING :b\r"]);
//! ```

use std::collections::VecDeque;

use crate::error::BufferError;

/// Default delimiter: a single newline. CR is left on the segment and
/// stripped by the line parser.
pub const DEFAULT_DELIMITER: &[u8] = b"\n";

/// Longest carried-over fragment accepted by default (8191 bytes, the
/// modern IRC line limit).
pub const MAX_LINE_LEN: usize = 8191;

/// Order in which completed segments are handed out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueueOrder {
    /// First in, first out (arrival order).
    #[default]
    Fifo,
    /// First in, last out (newest segment first).
    Filo,
}

/// Reassembles delimiter-terminated messages from a byte stream.
///
/// Invariant: the carried-over fragment never contains the delimiter.
/// When a maximum length is set, it also never grows past that length:
/// the buffer marks itself overflowed and stops accepting data instead.
#[derive(Debug, Clone)]
pub struct DelimitedDataBuffer {
    delimiter: Vec<u8>,
    order: QueueOrder,
    max_len: Option<usize>,
    overflowed: bool,
    /// Incomplete tail of the stream.
    fragment: Vec<u8>,
    /// Index into `fragment` where the next delimiter search starts.
    next_index: usize,
    completed: VecDeque<String>,
}

impl Default for DelimitedDataBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DelimitedDataBuffer {
    /// Create a FIFO buffer split on `\n`.
    pub fn new() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_vec(),
            order: QueueOrder::Fifo,
            max_len: None,
            overflowed: false,
            fragment: Vec::new(),
            next_index: 0,
            completed: VecDeque::new(),
        }
    }

    /// Create a buffer with an explicit delimiter and queue discipline.
    pub fn with_options(delimiter: &[u8], order: QueueOrder) -> Result<Self, BufferError> {
        if delimiter.is_empty() {
            return Err(BufferError::EmptyDelimiter);
        }
        Ok(Self {
            delimiter: delimiter.to_vec(),
            order,
            ..Self::new()
        })
    }

    /// Cap the carried-over fragment at `max_len` bytes.
    ///
    /// ```
    /// use bnc_proto::buffer::{DelimitedDataBuffer, MAX_LINE_LEN};
    ///
    /// let mut buf = DelimitedDataBuffer::new().with_max_len(MAX_LINE_LEN);
    /// buf.receive(&vec![b'A'; MAX_LINE_LEN + 1]);
    /// assert!(buf.overflowed());
    /// ```
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// The fragment cap, if any.
    pub fn max_len(&self) -> Option<usize> {
        self.max_len
    }

    /// Whether an unterminated segment outgrew the cap. Sticky until
    /// [`clear`](Self::clear).
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// The queue discipline chosen at construction.
    pub fn order(&self) -> QueueOrder {
        self.order
    }

    /// The current delimiter.
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// Replace the delimiter.
    ///
    /// The carried-over fragment is re-scanned with the new delimiter so the
    /// fragment invariant keeps holding.
    pub fn set_delimiter(&mut self, delimiter: &[u8]) -> Result<(), BufferError> {
        if delimiter.is_empty() {
            return Err(BufferError::EmptyDelimiter);
        }
        self.delimiter = delimiter.to_vec();
        self.next_index = 0;
        self.split_completed();
        Ok(())
    }

    /// Feed raw bytes from the stream.
    ///
    /// Every complete segment is moved to the completed queue in arrival
    /// order; the trailing partial segment is kept for the next call.
    ///
    /// If the trailing segment is longer than the cap it is dropped and the
    /// buffer is marked [`overflowed`](Self::overflowed). Further data is
    /// ignored until the buffer is cleared.
    pub fn receive(&mut self, data: &[u8]) {
        if data.is_empty() || self.overflowed {
            return;
        }
        self.fragment.extend_from_slice(data);
        self.split_completed();
        if self.max_len.is_some_and(|max| self.fragment.len() > max) {
            self.fragment = Vec::new();
            self.next_index = 0;
            self.overflowed = true;
        }
    }

    fn split_completed(&mut self) {
        let delim_len = self.delimiter.len();
        loop {
            // A delimiter may straddle the previous search boundary.
            let start = self.next_index.saturating_sub(delim_len - 1);
            let found = self.fragment[start..]
                .windows(delim_len)
                .position(|w| w == self.delimiter.as_slice());

            match found {
                Some(offset) => {
                    let end = start + offset;
                    let rest = self.fragment.split_off(end + delim_len);
                    let mut segment = std::mem::replace(&mut self.fragment, rest);
                    segment.truncate(end);
                    self.completed
                        .push_back(String::from_utf8_lossy(&segment).into_owned());
                    self.next_index = 0;
                }
                None => {
                    self.next_index = self.fragment.len();
                    return;
                }
            }
        }
    }

    /// Take the next completed segment according to the queue discipline.
    pub fn consume_next(&mut self) -> Option<String> {
        match self.order {
            QueueOrder::Fifo => self.completed.pop_front(),
            QueueOrder::Filo => self.completed.pop_back(),
        }
    }

    /// Drain every completed segment according to the queue discipline.
    pub fn consume_all(&mut self) -> Vec<String> {
        match self.order {
            QueueOrder::Fifo => self.completed.drain(..).collect(),
            QueueOrder::Filo => self.completed.drain(..).rev().collect(),
        }
    }

    /// The incomplete tail carried over to the next `receive`.
    pub fn fragment(&self) -> &[u8] {
        &self.fragment
    }

    /// Number of completed segments waiting to be consumed.
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    /// Whether no completed segment is waiting.
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Drop both the fragment and all completed segments.
    pub fn clear(&mut self) {
        self.fragment.clear();
        self.next_index = 0;
        self.overflowed = false;
        self.completed.clear();
    }
}
