use crate::models::frame::Frame;

/// Pull-based supplier of frames for a playback source node.
///
/// Called from the graph's streaming context once per render tick.
pub trait FrameSource: Send {
    /// Next frame to present, or `None` if the source has nothing to show.
    fn next_frame(&mut self) -> Option<Frame>;

    /// Number of frames the source cycles through.
    fn frame_count(&self) -> usize;
}
