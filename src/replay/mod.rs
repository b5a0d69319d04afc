pub mod error;
pub mod manifest;
pub mod camera;
pub mod undistort;
pub mod depth;
pub mod frame_source;

pub mod engine;
pub mod control;
pub mod rate;
pub mod config;
pub mod controller;
