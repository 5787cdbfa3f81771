use log::debug;

use super::SinkError;

/// Columns and rows of the LED matrix frame.
pub const MATRIX_SIZE: usize = 8;

/// Something that can show the trace. `clear` must be idempotent and usable
/// before any session has started.
pub trait DisplaySink: Send {
    fn render(&mut self, levels: &[u8]) -> Result<(), SinkError>;
    fn clear(&mut self) -> Result<(), SinkError>;
}

/// Turn the newest eight levels into eight row bitmaps, bars growing from
/// the bottom row, oldest shown level in the leftmost (most significant)
/// column. Longer traces lose their oldest entries.
pub fn matrix_rows(levels: &[u8]) -> [u8; MATRIX_SIZE] {
    let shown = &levels[levels.len().saturating_sub(MATRIX_SIZE)..];
    let mut rows = [0u8; MATRIX_SIZE];
    for (col, &level) in shown.iter().enumerate() {
        let height = usize::from(level).min(MATRIX_SIZE);
        for row in 0..height {
            rows[MATRIX_SIZE - 1 - row] |= 1 << (MATRIX_SIZE - 1 - col);
        }
    }
    rows
}

/// Renders frames into the diagnostic log and keeps the last one.
#[derive(Debug, Default)]
pub struct FrameLogDisplay {
    last: [u8; MATRIX_SIZE],
}

impl FrameLogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_frame(&self) -> [u8; MATRIX_SIZE] {
        self.last
    }
}

impl DisplaySink for FrameLogDisplay {
    fn render(&mut self, levels: &[u8]) -> Result<(), SinkError> {
        self.last = matrix_rows(levels);
        for (i, row) in self.last.iter().enumerate() {
            debug!("matrix row {}: {:08b}", i, row);
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), SinkError> {
        self.last = [0; MATRIX_SIZE];
        Ok(())
    }
}
