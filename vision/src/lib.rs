pub mod camera;
pub mod engine;
pub mod filter;
pub mod service;
