pub mod order;
pub mod rules;
pub mod signal;

pub use order::{
    GroupListStatus, GroupStatus, MarketFill, OrderRecord, OrderStatus, OrderType, ProtectiveGroup,
    Side,
};
pub use rules::{AssetBalance, SymbolTradingRules};
pub use signal::{Closure, DraftError, ExitType, Signal, SignalDraft, SignalStatus, SignalType};
