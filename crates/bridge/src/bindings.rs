//! Solidity interfaces for USDC and the CCTP V2 contracts.
//!
//! Only the functions and events the bridge touches are declared.

use alloy::sol;

sol! {
    #[sol(all_derives = true)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

sol! {
    #[sol(all_derives = true)]
    interface TokenMessengerV2 {
        function depositForBurn(
            uint256 amount,
            uint32 destinationDomain,
            bytes32 mintRecipient,
            address burnToken,
            bytes32 destinationCaller,
            uint256 maxFee,
            uint32 minFinalityThreshold
        ) external;

        event MintAndWithdraw(
            address indexed mintRecipient,
            uint256 amount,
            address indexed mintToken,
            uint256 feeCollected
        );
    }
}

sol! {
    #[sol(all_derives = true)]
    interface MessageTransmitterV2 {
        function receiveMessage(bytes calldata message, bytes calldata attestation)
            external
            returns (bool success);

        function usedNonces(bytes32 nonce) external view returns (uint256);

        event MessageSent(bytes message);
    }
}
