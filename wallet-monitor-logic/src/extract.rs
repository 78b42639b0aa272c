//! Heuristic address extraction from calldata and receipt logs.
//!
//! ABI-aware decoding would need per-function schemas the monitor does
//! not have; scanning 32-byte words catches the common layouts, and
//! downstream multicall validation filters the false positives.

use alloy::{primitives::Address, rpc::types::Log, sol_types::SolCall};

use crate::chain::abi::IERC20;

pub const ERC20_TRANSFER_SELECTOR: [u8; 4] = IERC20::transferCall::SELECTOR;

/// Scans the calldata in 32-byte words at two origins: the start of
/// the payload and right after the 4-byte selector. A word whose
/// first 12 bytes are zero is treated as a candidate address.
/// Returns unique candidates in encounter order.
pub fn addresses_from_calldata(data: &[u8]) -> Vec<Address> {
    let mut found = Vec::new();
    for origin in [0usize, 4] {
        if data.len() < origin {
            continue;
        }
        for word in data[origin..].chunks_exact(32) {
            if word[..12].iter().all(|byte| *byte == 0) {
                let candidate = Address::from_slice(&word[12..]);
                if candidate != Address::ZERO && !found.contains(&candidate) {
                    found.push(candidate);
                }
            }
        }
    }
    found
}

/// Emitting addresses of the given logs, unique, in encounter order.
pub fn addresses_from_logs(logs: &[Log]) -> Vec<Address> {
    let mut found = Vec::new();
    for log in logs {
        let address = log.address();
        if !found.contains(&address) {
            found.push(address);
        }
    }
    found
}

/// Recipient of an ERC20 `transfer` call, if the calldata is one.
pub fn transfer_recipient(data: &[u8]) -> Option<Address> {
    if data.len() < 4 + 36 || data[..4] != ERC20_TRANSFER_SELECTOR {
        return None;
    }
    Some(Address::from_slice(&data[16..36]))
}
