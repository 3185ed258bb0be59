//! Pirex Recommendation Core Domain Logic
//!
//! Pure algorithms behind the recommendation engine: vector math, score
//! fusion and calibration, diversity filtering, graph algorithms, feedback
//! math, text preprocessing, and learning-controller weight math. No I/O —
//! infrastructure crates wire these functions to stores, caches, and event
//! logs.

pub mod diversity;
pub mod feedback;
pub mod fusion;
pub mod graph;
pub mod jobs;
pub mod text;
pub mod vector;
pub mod weights;

pub use diversity::*;
pub use feedback::*;
pub use fusion::*;
pub use graph::*;
pub use jobs::*;
pub use text::*;
pub use vector::*;
pub use weights::*;
