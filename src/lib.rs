pub mod replay;
pub mod visualizer;
