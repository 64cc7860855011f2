mod balance;
mod chain;
mod contract;
mod points;

pub use balance::{BalanceChange, NewBalanceChange, UserBalance};
pub use chain::Chain;
pub use contract::Contract;
pub use points::{PointsCalculation, UserPoints};
