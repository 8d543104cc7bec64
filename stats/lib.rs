//! Model fitting and inference over panel designs.

pub mod covariance;
pub mod describe;
pub mod design;
pub mod estimate;
pub mod hausman;
pub mod linalg;
pub mod pvalue;
pub mod residuals;
pub mod vif;
