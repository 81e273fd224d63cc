pub mod cancel;

pub use cancel::{CancelJobCommand, CancelJobResponse};
