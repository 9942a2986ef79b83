pub mod source;

pub use source::{HypothesisSource, Recognizer, RecognizerEvent};
