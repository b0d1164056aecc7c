pub mod threshold;

pub use threshold::{AlertState, AlertStatus, Transition, evaluate, evaluate_with_margin};
