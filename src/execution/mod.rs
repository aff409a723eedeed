// Broker access, market data intake and position lifecycle
pub mod bar_buffer;
pub mod broker;
pub mod paper_broker;
pub mod position_manager;
pub mod price_feed;

pub use bar_buffer::BarBuffer;
pub use broker::{AccountInfoProvider, BrokerClient, BrokerGateway, BrokerSettings};
pub use paper_broker::{PaperBroker, PaperSettings};
pub use position_manager::{ClosedTrade, ExitReason, Position, PositionManager, PositionStatus};
pub use price_feed::{drain_queue, PriceFeed};
