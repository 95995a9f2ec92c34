//! Speed image preprocessing
//!
//! - `edge`: Gaussian blur + gradient magnitude remap for edge-stopping snakes
//! - `threshold`: smooth binary threshold for region competition snakes
//! - `speed`: mode selection and slice evaluation
//! - `preview`: preview buffer decoupled from the applied speed
//! - `colormap`: speed to RGBA for display

pub mod edge;
pub mod threshold;
pub mod speed;
pub mod preview;
pub mod colormap;

pub use edge::*;
pub use threshold::*;
pub use speed::*;
pub use preview::*;
pub use colormap::*;
