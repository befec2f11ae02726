pub mod frame_source;
pub mod looper_delegate;
pub mod processing_graph;
