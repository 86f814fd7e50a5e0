//! Emotion detection and its correlation with the track being played.

mod aggregator;
mod classifier;
mod histogram;
mod sink;

pub use aggregator::{ActiveState, AggregatorConfig, EmotionAggregator, FinalizeOutcome};
pub use classifier::{EmotionClassifier, EmotionDetection, FaceBox, HttpEmotionClassifier};
pub use histogram::EmotionHistogram;
pub use sink::{EmotionSink, SinkFailurePolicy, StoreEmotionSink};
