pub mod error;
pub mod layout;
pub mod shape;
pub mod tensor;
pub mod tiled_tensor;

pub mod config;
pub mod copy;
pub mod tiling;
pub mod conv;
pub mod kernel;
pub mod backend;
