//! Stack trace capture.

use super::StackIterator;
use std::fmt;
use std::sync::Arc;
use strata_core::Method;

/// Kind of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// JIT-compiled code.
    Managed,
    /// VM, interpreter or native-method code.
    Native,
}

/// One captured frame.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Executing method, when known.
    pub method: Option<Arc<Method>>,
    /// Instruction pointer at capture time.
    pub ip: usize,
    /// Offset of `ip` into the managed unit.
    pub offset: Option<usize>,
}

/// Frames of one thread, newest first.
#[derive(Debug, Clone, Default)]
pub struct StackTrace {
    frames: Vec<TraceFrame>,
    truncated: bool,
}

impl StackTrace {
    /// Walk a duplicate of `iter`, recording at most `limit` frames.
    pub fn capture(iter: &StackIterator<'_>, limit: usize) -> Self {
        let mut walker = iter.clone();
        let mut trace = Self::default();

        while !walker.is_past_end() {
            if trace.frames.len() == limit {
                trace.truncated = true;
                break;
            }
            let frame = match walker.unit() {
                Some(unit) => TraceFrame {
                    kind: FrameKind::Managed,
                    method: Some(Arc::clone(unit.method())),
                    ip: walker.ip(),
                    offset: Some(walker.ip().wrapping_sub(unit.code_start())),
                },
                None => TraceFrame {
                    kind: FrameKind::Native,
                    method: walker.method().cloned(),
                    ip: walker.ip(),
                    offset: None,
                },
            };
            trace.frames.push(frame);
            walker.step();
        }
        trace
    }

    /// Captured frames.
    #[inline]
    pub fn frames(&self) -> &[TraceFrame] {
        &self.frames
    }

    /// Number of captured frames.
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True if the walk stopped at the frame limit.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            match (&frame.method, frame.kind) {
                (Some(method), FrameKind::Managed) => {
                    writeln!(f, "\tat {}(+{:#x})", method, frame.offset.unwrap_or(0))?
                }
                (Some(method), FrameKind::Native) => writeln!(f, "\tat {}(Native Method)", method)?,
                (None, _) => writeln!(f, "\tat <native>")?,
            }
        }
        if self.truncated {
            writeln!(f, "\t...")?;
        }
        Ok(())
    }
}
