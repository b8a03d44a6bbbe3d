//! Contract addresses and ABI bindings for the Polygon contracts the core touches.

use alloy::primitives::{address, b256, Address, B256};

/// CTF Exchange contract on Polygon.
pub const CTF_EXCHANGE: Address = address!("4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e");

/// NegRisk CTF Exchange contract on Polygon.
pub const NEG_RISK_CTF_EXCHANGE: Address = address!("c5d563a36ae78145c45a50134d48a1215220f80a");

/// Conditional Tokens (ERC-1155) contract on Polygon.
pub const CONDITIONAL_TOKENS: Address = address!("4D97DCd97eC945f40cF65F87097ACe5EA0476045");

/// Bridged USDC.e on Polygon, the exchange's collateral.
pub const USDC: Address = address!("2791Bca1f2de4661ED88A30C99A7a9449Aa84174");

/// Keccak256 of OrderFilled(bytes32,address,address,uint256,uint256,uint256,uint256,uint256)
pub const ORDER_FILLED_TOPIC: B256 =
    b256!("d0a08e8c493f9c94f29311604c9de1b4e8c8d4c06bd0c789af57f2d65bfec0f6");

/// Both USDC and outcome tokens use 6 decimals.
pub const TOKEN_DECIMALS: u32 = 6;

pub const EXCHANGE_CONTRACTS: [Address; 2] = [CTF_EXCHANGE, NEG_RISK_CTF_EXCHANGE];

alloy::sol! {
    #[sol(rpc)]
    interface IConditionalTokens {
        function safeTransferFrom(address from, address to, uint256 id, uint256 value, bytes data) external;
        function safeBatchTransferFrom(address from, address to, uint256[] ids, uint256[] values, bytes data) external;
        function balanceOf(address account, uint256 id) external view returns (uint256);
        function redeemPositions(address collateralToken, bytes32 parentCollectionId, bytes32 conditionId, uint256[] indexSets) external;
    }

    #[sol(rpc)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
    }

    #[sol(rpc)]
    interface IPolyHunterProxy {
        function getStats() external view returns (uint256 balance, uint256 deposited, uint256 withdrawn, uint256 feesPaid, int256 profit, uint256 currentFeePercent);
        function getBalance() external view returns (uint256);
        function getProfit() external view returns (int256);
        function paused() external view returns (bool);
        function allowedTargets(address target) external view returns (bool);
        function execute(address target, bytes data) external returns (bytes);
        function deposit(uint256 amount) external;
        function withdraw(uint256 amount) external;
        function approveTrading(address spender, uint256 amount) external;
    }

    #[sol(rpc)]
    interface IProxyFactory {
        function getUserProxy(address user) external view returns (address);
    }
}
