/// Splits the not-yet-delivered suffix off a cumulative console log.
///
/// Offsets are byte offsets into the UTF-8 text. A snapshot that is empty or
/// not longer than `delivered` yields an empty delta and leaves the offset
/// untouched, so a shorter or repeated snapshot is treated as "nothing new".
pub fn compute_delta(cumulative: &str, delivered: usize) -> (&str, usize) {
    if cumulative.is_empty() || cumulative.len() <= delivered {
        return ("", delivered);
    }

    // Only reachable when upstream rewrote earlier output; never split a char.
    let mut start = delivered;
    while !cumulative.is_char_boundary(start) {
        start += 1;
    }

    (&cumulative[start..], cumulative.len())
}

/// Delivered-offset for a single streaming session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogCursor {
    delivered: usize,
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Returns the pending delta along with the offset to commit once it has
    /// actually been sent.
    pub fn pending<'a>(&self, cumulative: &'a str) -> (&'a str, usize) {
        compute_delta(cumulative, self.delivered)
    }

    pub fn commit(&mut self, offset: usize) {
        self.delivered = self.delivered.max(offset);
    }
}
