//! Splits forwarded byte streams into impairment-sized chunks.
//!
//! Small reads are treated as line traffic: complete lines become chunks and
//! a trailing partial line is carried until its newline arrives. Bulk reads
//! are cut into ~MTU-sized pieces. Either way, each chunk is one unit of
//! drop/latency/duplication.

/// MTU-ish chunk size for bulk traffic.
pub const BULK_CHUNK_SIZE: usize = 1400;

/// Reads at or below this size go through line-based chunking.
const LINE_MODE_THRESHOLD: usize = 1024;

/// Cap on carried partial-line bytes.
const MAX_PENDING: usize = 64 * 1024;

/// Stateful stream chunker; one per forwarder direction.
#[derive(Default)]
pub struct Chunker {
    pending: Vec<u8>,
}

impl Chunker {
    /// Fresh chunker with no carried bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes; `emit` is called once per chunk.
    ///
    /// Returns false as soon as `emit` does, aborting the remainder.
    pub fn process(&mut self, data: &[u8], mut emit: impl FnMut(&[u8]) -> bool) -> bool {
        if data.len() <= LINE_MODE_THRESHOLD || !self.pending.is_empty() {
            self.process_lines(data, &mut emit)
        } else {
            Self::process_bulk(data, &mut emit)
        }
    }

    /// Flush any carried partial line (EOF path).
    pub fn flush(&mut self, mut emit: impl FnMut(&[u8]) -> bool) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        let pending = std::mem::take(&mut self.pending);
        emit(&pending)
    }

    fn process_lines(&mut self, data: &[u8], emit: &mut impl FnMut(&[u8]) -> bool) -> bool {
        let mut pos = 0;
        while pos < data.len() {
            match data[pos..].iter().position(|&b| b == b'\n') {
                Some(nl) => {
                    let end = pos + nl + 1; // newline included
                    if self.pending.is_empty() {
                        if !emit(&data[pos..end]) {
                            return false;
                        }
                    } else {
                        self.pending.extend_from_slice(&data[pos..end]);
                        if self.pending.len() <= MAX_PENDING {
                            let line = std::mem::take(&mut self.pending);
                            if !emit(&line) {
                                return false;
                            }
                        } else {
                            self.pending.clear();
                        }
                    }
                    pos = end;
                }
                None => {
                    let rest = &data[pos..];
                    if self.pending.len() + rest.len() <= MAX_PENDING {
                        self.pending.extend_from_slice(rest);
                    } else if self.pending.is_empty() {
                        // Single oversized fragment; forward as-is.
                        if !emit(rest) {
                            return false;
                        }
                    } else {
                        // Flush what we have and start the carry over.
                        let pending = std::mem::take(&mut self.pending);
                        if !emit(&pending) {
                            return false;
                        }
                        if rest.len() <= MAX_PENDING {
                            self.pending.extend_from_slice(rest);
                        } else if !emit(rest) {
                            return false;
                        }
                    }
                    break;
                }
            }
        }
        true
    }

    fn process_bulk(data: &[u8], emit: &mut impl FnMut(&[u8]) -> bool) -> bool {
        for chunk in data.chunks(BULK_CHUNK_SIZE) {
            if !emit(chunk) {
                return false;
            }
        }
        true
    }
}
