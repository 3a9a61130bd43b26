use std::fmt;
use std::time::Duration;

/// Outcome of one batch run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    pub rows_read: usize,
    /// Rows actually stored; distinct skips are not counted.
    pub rows_written: usize,
    pub src: String,
    pub dst: String,
    pub elapsed: Duration,
}

impl BatchStats {
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            ..Self::default()
        }
    }

    fn per_second(&self, rows: usize) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            rows as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for BatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{read: {}, written: {}, elapsed:{:.3}, r/s: {:.1}, w/s: {:.1}, src: {}, dst: {}}}",
            self.rows_read,
            self.rows_written,
            self.elapsed.as_secs_f64(),
            self.per_second(self.rows_read),
            self.per_second(self.rows_written),
            self.src,
            self.dst
        )
    }
}
