pub mod synthesizer;
#[cfg(test)]
mod tests;

pub use synthesizer::{SignalBreakdown, SignalSynthesizer};
