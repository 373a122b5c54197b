use std::collections::VecDeque;

/// Smallest capacity a buffer will accept
pub const MIN_CAPACITY: usize = 50;

/// Bounded ring of raw log lines in file order
#[derive(Clone, Debug, Default)]
pub struct LineBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LineBuffer {
    /// Create a buffer; capacities below [`MIN_CAPACITY`] are raised to it
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Buffer with an exact capacity, for tests
    #[cfg(test)]
    pub(crate) fn with_exact_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append lines, evicting the oldest; returns how many were dropped from the head
    pub fn append<I>(&mut self, lines: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        self.lines.extend(lines);
        self.trim()
    }

    /// Replace the contents with a snapshot; returns how many snapshot lines were dropped
    pub fn replace(&mut self, lines: Vec<String>) -> usize {
        self.lines = VecDeque::from(lines);
        self.trim()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    fn trim(&mut self) -> usize {
        let excess = self.lines.len().saturating_sub(self.capacity);
        self.lines.drain(..excess);
        excess
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.lines.iter().map(String::as_str)
    }

    /// Lines in `[start, start + count)`
    pub fn range(&self, start: usize, count: usize) -> Vec<String> {
        self.lines.iter().skip(start).take(count).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// `radius` lines either side of `index`
    pub fn context(&self, index: usize, radius: usize) -> Option<LineContext> {
        if index >= self.lines.len() {
            return None;
        }
        let start = index.saturating_sub(radius);
        let end = (index + radius + 1).min(self.lines.len());
        Some(LineContext {
            lines: self.range(start, end - start),
            start,
            focus: index - start,
        })
    }
}

/// A window of raw lines around one line of interest
#[derive(Clone, Debug, PartialEq)]
pub struct LineContext {
    pub lines: Vec<String>,
    /// Raw index of `lines[0]`
    pub start: usize,
    /// Position of the focused line within `lines`
    pub focus: usize,
}
