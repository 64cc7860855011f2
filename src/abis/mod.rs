pub mod erc20;

pub use erc20::{Transfer, IERC20};
