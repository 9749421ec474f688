mod base;
mod batch;
mod materialization;
mod retry;

pub use base::*;
pub use batch::*;
pub use materialization::*;
pub use retry::*;
