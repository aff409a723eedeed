// Orchestration of the decision cycle
pub mod context;
pub mod trading_loop;

pub use context::{CycleReport, EngineContext, SignalOutcome, SignalRecord};
pub use trading_loop::{ControlOutcome, TradingEngine};
