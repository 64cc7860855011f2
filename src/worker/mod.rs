mod chain_client;
mod chains;
mod parser;
mod worker;

pub use chain_client::ChainClient;
pub use chains::ChainManager;
pub use parser::TransferLog;
pub use worker::ChainWorker;
