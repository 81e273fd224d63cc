pub mod store;

pub use store::{StoreOnChainCommand, StoreOnChainError, StoreOnChainResponse};
