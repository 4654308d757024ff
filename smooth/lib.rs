#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Data preparation and hyperparameter calibration for Bayesian nonparametric
//! smoothing with shrinkage-prior Markov random fields.
//!
//! Raw observations are discretised onto a [`grid::TimeGrid`], reduced to
//! per-cell sufficient statistics, used to calibrate the global shrinkage scale
//! and assembled into a [`model::ModelSpec`] for an external sampling engine.
//! Draws returned by the engine are mapped back to the trajectory scale by
//! [`posterior`].

pub mod calibrate;
pub mod config;
pub mod data;
pub mod difference;
pub mod engine;
pub mod grid;
pub mod likelihood;
pub mod model;
pub mod pipeline;
pub mod posterior;
pub mod quadrature;
pub mod types;
