//! ABI bindings for the contracts the dashboard talks to.

use alloy_sol_types::sol;

sol! {
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256 balance);
    }

    interface IProtocolToken {
        function rebalanceLiquidity() external;
        function lastRebalance() external view returns (uint256 timestamp);
        function rebalanceInterval() external view returns (uint256 interval);
        function liquidityLockDivisor() external view returns (uint256 divisor);
        function callerRewardDivisor() external view returns (uint256 divisor);
        function rebalanceDivisor() external view returns (uint256 divisor);
    }

    interface IEnsRegistry {
        function resolver(bytes32 node) external view returns (address resolverAddress);
    }

    interface IEnsResolver {
        function name(bytes32 node) external view returns (string ensName);
    }
}
