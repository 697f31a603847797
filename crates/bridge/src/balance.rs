//! Read-only USDC queries.

use alloy::primitives::{Address, U256};
use xusdc_evm::{Evm, EvmError};

use crate::bindings::IERC20;

/// Balance and allowance reader bound to one USDC contract.
pub struct UsdcReader<'a, E> {
    evm: &'a E,
    usdc: Address,
}

impl<'a, E: Evm> UsdcReader<'a, E> {
    pub const fn new(evm: &'a E, usdc: Address) -> Self {
        Self { evm, usdc }
    }

    pub async fn balance_of(&self, owner: Address) -> Result<U256, EvmError> {
        self.evm
            .call(self.usdc, IERC20::balanceOfCall { account: owner })
            .await
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, EvmError> {
        self.evm
            .call(self.usdc, IERC20::allowanceCall { owner, spender })
            .await
    }
}
