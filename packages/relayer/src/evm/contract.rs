//! Bridge contract ABI definitions.
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the bridge
//! contract surface the relayer touches.

use alloy::sol;

sol! {
    #[sol(rpc)]
    contract Bridge {
        /// Emitted when a deposit is locked for bridging out of this chain.
        event Deposit(
            uint8 indexed destinationChainId,
            bytes32 indexed resourceId,
            uint64 indexed depositNonce,
            uint256 amount,
            bytes recipient
        );

        /// Relayer vote acknowledging an incoming proposal.
        function voteProposal(
            uint8 chainId,
            uint64 depositNonce,
            bytes32 resourceId,
            bytes32 dataHash
        ) external;
    }
}
