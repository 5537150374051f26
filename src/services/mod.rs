pub mod balance_ledger;
pub mod candles;
pub mod order_ledger;
pub mod price_engine;
pub mod settlement;
pub mod sqlite_store;
pub mod symbol_registry;

pub use balance_ledger::BalanceLedger;
pub use candles::{aggregate, load_candles, CandleAggregator};
pub use order_ledger::{OrderLedger, SweepReport, TradingError};
pub use price_engine::{manipulate_price, simulate_fallback, PriceDraws, PriceEngine};
pub use settlement::SettlementScheduler;
pub use sqlite_store::SqliteStore;
pub use symbol_registry::SymbolRegistry;
