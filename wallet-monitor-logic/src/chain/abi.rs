use alloy::sol;

sol! {
    /// The slice of ERC20 the monitor reads and recognizes.
    interface IERC20 {
        function symbol() external view returns (string memory);
        function decimals() external view returns (uint8);
        function transfer(address to, uint256 amount) external returns (bool);
    }

    /// Pool probe used to pull underlying tokens out of pair contracts.
    interface IUniswapV2Pair {
        function token0() external view returns (address);
        function token1() external view returns (address);
    }
}
