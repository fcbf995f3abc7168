mod aligner;
mod preprocess;

pub use aligner::*;
pub use preprocess::*;
