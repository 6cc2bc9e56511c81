pub mod executor;
pub mod scheduler;
pub mod session;

pub use executor::*;
pub use scheduler::*;
pub use session::*;
