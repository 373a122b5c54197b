use std::io::{self, Write};

use tailscope_logs::{LineBuffer, estimate_new_lines, format_line_for_copy};

/// Terminal sink that prints each visible line once.
///
/// Every view update is reduced to the lines not printed yet by overlapping
/// the current visible window with what was shown before.
pub struct Follower<W: Write> {
    out: W,
    shown: LineBuffer,
    show_timestamps: bool,
}

impl<W: Write> Follower<W> {
    pub fn new(out: W, capacity: usize, show_timestamps: bool) -> Self {
        Self {
            out,
            shown: LineBuffer::new(capacity),
            show_timestamps,
        }
    }

    /// Print the unseen tail of `visible`.
    ///
    /// Returns false when nothing printed before could be found in `visible`,
    /// meaning the whole window was printed again.
    pub fn sync(&mut self, visible: &[String]) -> io::Result<bool> {
        let estimate = estimate_new_lines(&self.shown, visible);
        let continued = estimate.anchor.is_some() || self.shown.is_empty() || visible.is_empty();

        for line in &visible[visible.len() - estimate.new_count..] {
            writeln!(self.out, "{}", format_line_for_copy(line, self.show_timestamps))?;
        }
        self.shown.replace(visible.to_vec());
        self.out.flush()?;
        Ok(continued)
    }

    #[cfg(test)]
    fn output(&self) -> &W {
        &self.out
    }
}
