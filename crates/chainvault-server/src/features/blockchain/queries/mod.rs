pub mod networks;
pub mod retrieve;
pub mod transactions;

pub use networks::{NetworkView, NetworksQuery};
pub use retrieve::{RetrieveQuery, RetrieveResponse};
pub use transactions::{TransactionsQuery, TransactionsResponse};
