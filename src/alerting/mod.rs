pub mod transition;

pub use transition::{Transition, TransitionNotifier, detect_transition};
