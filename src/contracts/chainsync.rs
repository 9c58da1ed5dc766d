//! ChainSync settlement contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings, so every call site
//! is checked at compile time instead of dispatching on method-name strings.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// ChainSync settlement contract deployed on every supported chain
    #[sol(rpc)]
    contract ChainSync {
        /// Credit a transfer that originated on another chain
        /// Called by a registered validator after observing `TransferInitiated`
        ///
        /// # Arguments
        /// * `transferId` - Identifier emitted by the source chain
        /// * `user` - Originating account on the source chain
        /// * `token` - Token address on this (destination) chain
        /// * `amount` - Amount in the token's base units
        /// * `sourceChain` - Chain id the transfer came from
        /// * `recipient` - Account credited on this chain
        /// * `txHash` - Source-chain transaction hash, for audit
        function relayTransfer(
            bytes32 transferId,
            address user,
            address token,
            uint256 amount,
            uint256 sourceChain,
            address recipient,
            string txHash
        ) external;

        /// Transfer record by id; a zero `id` means the transfer is unknown here
        function transfers(bytes32 transferId) external view returns (
            bytes32 id,
            address user,
            address token,
            uint256 amount,
            uint256 fee,
            uint256 sourceChain,
            uint256 destinationChain,
            address recipient,
            uint8 status,
            uint256 timestamp,
            string txHash
        );

        /// Fee charged for a transfer of `amount` base units
        function calculateFee(uint256 amount) external view returns (uint256);

        /// Whether `account` is a registered validator
        function validators(address account) external view returns (bool);

        /// Emitted by the source chain when a user locks funds
        event TransferInitiated(
            bytes32 indexed transferId,
            address indexed user,
            address indexed token,
            uint256 amount,
            uint256 fee,
            uint256 sourceChain,
            uint256 destinationChain,
            address recipient
        );
    }
}

sol! {
    /// Minimal ERC20 surface used for balance checks
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
    }
}
