pub mod health;
pub mod proxy;
pub mod refresh;

pub use health::*;
pub use proxy::*;
pub use refresh::*;
