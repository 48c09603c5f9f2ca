pub mod error;
pub mod remote;
pub mod retry;
pub mod traits;

pub use error::ExchangeError;
pub use remote::BinanceClient;
pub use retry::RetryPolicy;
pub use traits::{ExchangeAdapter, ProtectiveGroupRequest};

#[cfg(feature = "mocks")]
pub use traits::MockExchangeAdapter;
