mod app;
mod net;
mod rpc;
mod validation;

pub use app::{AppError, AppResult};
pub use net::{NetError, ProtocolError};
pub use rpc::RpcError;
pub use validation::ValidationError;
