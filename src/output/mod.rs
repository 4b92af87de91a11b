mod loopback;

pub use loopback::V4L2Output;

use crate::capture::Frame;
use anyhow::Result;

/// Trait for output destinations
///
/// Receives the frame and the overlay drawn for it once per detection cycle.
pub trait OutputSink<S: ?Sized> {
    fn present(&mut self, frame: &Frame, overlay: &S) -> Result<()>;
}

impl<S: ?Sized, T: OutputSink<S> + ?Sized> OutputSink<S> for Box<T> {
    fn present(&mut self, frame: &Frame, overlay: &S) -> Result<()> {
        (**self).present(frame, overlay)
    }
}

/// Discards every frame; the overlay surface itself is the result
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl<S: ?Sized> OutputSink<S> for NullSink {
    fn present(&mut self, _frame: &Frame, _overlay: &S) -> Result<()> {
        Ok(())
    }
}
