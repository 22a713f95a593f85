//! Conjugate-exponential-family building blocks.
//!
//! Point estimates (`Categorical`, `CategoricalMatrix`, `Normal`) are what EM
//! refines and what decoding uses. Their conjugate priors (`Dirichlet`,
//! `DirichletMatrix`, `NormalGamma`, `MultimerNormalGamma`) carry VB
//! posteriors. Every update returns a new value.

pub mod categorical;
pub mod dirichlet;
pub mod multimer;
pub mod normal;
pub mod normal_gamma;
pub mod traits;

pub use categorical::{Categorical, CategoricalMatrix};
pub use dirichlet::{Dirichlet, DirichletMatrix};
pub use multimer::{MultimerNormalGamma, StepDraw, StepStats};
pub use normal::{Normal, NormalStats, Precision};
pub use normal_gamma::{GammaShape, NormalDraw, NormalGamma};
pub use traits::{Conjugate, Emission, Sample};
