pub mod projectx;

pub use projectx::{Account, BarQuery, Contract, OrderRequest, ProjectXClient, TradeRecord};
