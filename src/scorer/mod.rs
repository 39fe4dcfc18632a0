pub mod indicators;
pub mod wheel_score;

pub use indicators::{support, trend, volatility};
pub use wheel_score::{calculate_wheel_score, score_candidate, ScoreInputs, ScoreWeights};
