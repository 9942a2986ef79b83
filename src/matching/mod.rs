pub mod classify;
pub mod normalize;
pub mod similarity;

pub use classify::{classify, Outcome, PracticeResult, Tier, ACCEPT_THRESHOLD};
pub use normalize::{comparison_key, normalize, normalize_opt};
pub use similarity::{levenshtein, similarity};
