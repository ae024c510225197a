pub mod circular_buffer;
pub mod config;
pub mod frame;
pub mod gate;
pub mod health;
pub mod types;

pub use circular_buffer::*;
pub use config::*;
pub use frame::*;
pub use gate::*;
pub use health::*;
pub use types::*;
