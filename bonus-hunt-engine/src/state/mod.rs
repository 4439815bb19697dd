pub mod guess;
pub mod hunt;
pub mod outcome;

pub use guess::*;
pub use hunt::*;
pub use outcome::*;
