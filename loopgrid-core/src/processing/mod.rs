pub mod palindrome;
pub mod playback;
pub mod ring_buffer;
