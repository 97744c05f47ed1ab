//! Generative models: the round engine and everything it learns with.
//!
//! This module provides:
//! - `GmDefinition` / `Conjecture` / `Intention`: static, declarative GM
//!   descriptions authored per agent profile
//! - `ConjectureActivation`: a conjecture bound to a subject, optionally
//!   carrying a goal
//! - `CourseOfAction` / `Efficacy`: action sequences and their learned
//!   correlation with conjecture satisfaction
//! - `GenerativeModel`: the per-GM round-engine actor
//! - `GmRuntime`: graph wiring, supervision and shutdown
//!
//! # Wiring a GM
//!
//! ```rust,ignore
//! use cortex_core::gm::{GmDefinition, GmLinks};
//!
//! let def = GmDefinition::new("navigator")
//!     .hyper_prior()
//!     .with_conjecture(course_safe())
//!     .with_intention(steer());
//! runtime.spawn_gm(def, GmLinks::with_subs(&["proximity"])).await?;
//! ```

pub mod activation;
pub mod coa;
pub mod definition;
mod instance;
pub mod precision;
mod runtime;

pub use activation::ConjectureActivation;
pub use coa::{CourseOfAction, Efficacy, ExecutedCoa, Intent, IntentValue, Intention};
pub use definition::{
    goal_activator, self_activator, Activator, Conjecture, GmDefinition, Predictor, Valuator,
};
pub use instance::{GenerativeModel, GmLinks};
pub use runtime::GmRuntime;
