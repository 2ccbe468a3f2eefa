use alloy_sol_types::sol;

sol! {
    /// ERC-20 surface needed to shield a token
    #[derive(Debug)]
    interface IERC20 {
        function decimals() external view returns (uint8);

        function allowance(address owner, address spender) external view returns (uint256);

        function approve(address spender, uint256 amount) external returns (bool);

        function balanceOf(address account) external view returns (uint256);
    }
}
