use alloy::{
    consensus::Transaction as _,
    primitives::{Address, Bytes, B256, U256},
    rpc::types::{Block as RpcBlock, Transaction as RpcTransaction},
};

/// Where a transaction was first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOrigin {
    Block,
    Mempool,
}

impl TxOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxOrigin::Block => "block",
            TxOrigin::Mempool => "mempool",
        }
    }
}

/// Normalized transaction, immutable after construction.
///
/// Legacy transactions carry `gas_price`; typed transactions carry the
/// fee-cap pair instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: B256,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub index: Option<u64>,
    pub from: Address,
    pub to: Option<Address>,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub input: Bytes,
    pub value: U256,
    pub chain_id: Option<u64>,
    pub origin: TxOrigin,
}

impl Transaction {
    pub fn from_rpc(tx: RpcTransaction, origin: TxOrigin) -> Self {
        let gas_price = tx.gas_price();
        Self {
            hash: alloy::network::TransactionResponse::tx_hash(&tx),
            block_number: tx.block_number,
            block_hash: tx.block_hash,
            index: tx.transaction_index,
            from: alloy::network::TransactionResponse::from(&tx),
            to: tx.to(),
            nonce: tx.nonce(),
            gas_limit: tx.gas_limit(),
            gas_price,
            max_fee_per_gas: gas_price.is_none().then(|| tx.max_fee_per_gas()),
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas(),
            input: tx.input().clone(),
            value: tx.value(),
            chain_id: tx.chain_id(),
            origin,
        }
    }

    /// First ten characters of the calldata, `"0x"` for plain value
    /// transfers.
    pub fn selector(&self) -> String {
        if self.input.is_empty() {
            return "0x".to_string();
        }
        let end = self.input.len().min(4);
        format!("0x{}", hex::encode(&self.input[..end]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn from_rpc(block: RpcBlock) -> Self {
        let number = block.header.number;
        let hash = block.header.hash;
        let timestamp = block.header.timestamp;
        let transactions = block
            .transactions
            .into_transactions()
            .map(|tx| {
                let mut tx = Transaction::from_rpc(tx, TxOrigin::Block);
                // some nodes omit the block context on full-block fetches
                tx.block_number.get_or_insert(number);
                tx.block_hash.get_or_insert(hash);
                tx
            })
            .collect();
        Self {
            number,
            hash,
            timestamp,
            transactions,
        }
    }
}
