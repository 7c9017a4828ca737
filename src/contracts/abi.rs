//! Solidity ABI of the bridge contracts
//!
//! Used by the RPC adapters in [`crate::providers`] to talk to deployed
//! contracts. The in-process contracts in this module's siblings implement
//! the same surface.

use alloy_sol_types::sol;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface ITokenMessenger {
        event MessageSent(
            uint32 indexed destinationDomain,
            uint64 indexed nonce,
            bytes sender,
            bytes recipient,
            uint256 amount
        );

        error ZeroAmount();
        error UnknownDomain(uint32 domain);
        error InsufficientFunds(uint256 balance, uint256 requested);

        function localDomain() external view returns (uint32);
        function burnAndSend(uint32 destinationDomain, bytes calldata recipient, uint256 amount)
            external
            returns (uint64 nonce);
    }

    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IMessageTransmitter {
        event MessageReceived(
            bytes32 indexed messageHash,
            uint32 indexed sourceDomain,
            uint64 indexed nonce,
            bytes recipient,
            uint256 amount
        );

        error MalformedMessage();
        error AlreadyProcessed(uint32 sourceDomain, uint64 nonce);
        error ThresholdNotMet(uint32 valid, uint32 required);
        error Paused();

        function receiveMessage(bytes calldata message, bytes[] calldata signatures)
            external
            returns (bool);
        function isMessageReceived(bytes32 messageHash) external view returns (bool);
    }

    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IAttesterRegistry {
        error Unauthorized(address caller);
        error InvalidThreshold(uint32 domain, uint32 threshold);

        function addAttester(uint32 domain, address identity) external;
        function removeAttester(uint32 domain, address identity) external;
        function setThreshold(uint32 domain, uint32 threshold) external;
        function isAttester(uint32 domain, address identity) external view returns (bool);
        function getThreshold(uint32 domain) external view returns (uint32);
        function getAttesters(uint32 domain) external view returns (address[] memory);
        function version() external view returns (uint64);
    }
}
