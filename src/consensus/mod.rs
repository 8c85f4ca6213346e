//! 多模型共识：把一个问题并发发给多个独立 provider，汇总各自的回答或错误

pub mod fanout;
pub mod responder;

pub use fanout::{AnswerOutcome, ConsensusAnswer, ConsensusFanout, ConsensusResult};
pub use responder::{LlmResponder, Responder};
