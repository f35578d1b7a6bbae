//! Compile-time ABI definitions for the pool and token reads.
//!
//! `token0()`/`token1()` share selectors across both pool flavours; they are
//! declared on each interface so call sites read naturally.

use alloy::sol;

sol! {
    interface IUniswapV2Pair {
        function token0() external view returns (address);
        function token1() external view returns (address);
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }
}

sol! {
    interface IUniswapV3Pool {
        function token0() external view returns (address);
        function token1() external view returns (address);
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );
    }
}

sol! {
    interface IERC20Metadata {
        function symbol() external view returns (string);
    }
}

// Pre-standard tokens (MKR, SAI) return `bytes32` from the same selector.
sol! {
    interface IERC20MetadataBytes32 {
        function symbol() external view returns (bytes32);
    }
}
