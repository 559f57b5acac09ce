pub mod health;
pub mod policy;
pub mod proxy;
pub mod rotation;

pub use health::*;
pub use policy::*;
pub use proxy::*;
pub use rotation::*;
