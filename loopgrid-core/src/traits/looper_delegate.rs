use crate::models::error::LooperError;
use crate::models::frame::KeyNumber;
use crate::models::loop_result::LoopResult;

/// Event delegate for looper notifications.
///
/// All methods are called on the control thread from inside `Looper` calls.
pub trait LooperDelegate: Send + Sync {
    /// Called when a key press starts recording.
    fn on_recording_started(&self, key: KeyNumber);

    /// Called when a released key's recording is wired into a playback slot.
    fn on_loop_ready(&self, result: &LoopResult);

    /// Called when a key or graph operation fails.
    fn on_error(&self, error: &LooperError);
}
