pub mod looper;
pub mod recording;
