use alloy::sol;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);

    #[sol(rpc)]
    interface IERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }
}
