// Material stock services
pub mod reconciliation;
pub mod stock_store;

pub use reconciliation::{ReconciliationEngine, WithdrawRequest, WithdrawResult};
pub use stock_store::{MaterialList, StockStore, Subscription};
