//! JSON-RPC mock plumbing shared by the crate's tests.

use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use serde_json::{json, Value};
use url::Url;
use wiremock::{matchers::method as http_method, Mock, MockServer, Request, Respond, ResponseTemplate};

enum RuleResponse {
    Result(Value),
    Error { code: i64, message: String },
}

struct Rule {
    method: String,
    param_contains: Option<String>,
    response: RuleResponse,
    delay: Option<Duration>,
}

struct Responder {
    rules: Arc<RwLock<Vec<Rule>>>,
}

impl Respond for Responder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let id = body.get("id").cloned().unwrap_or(json!(1));
        let method = body
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let params = body.get("params").map(Value::to_string).unwrap_or_default();
        for rule in self.rules.read().iter() {
            let params_match = rule
                .param_contains
                .as_ref()
                .is_none_or(|needle| params.contains(needle.as_str()));
            if rule.method == method && params_match {
                let body = match &rule.response {
                    RuleResponse::Result(result) => {
                        json!({"jsonrpc": "2.0", "id": id, "result": result})
                    }
                    RuleResponse::Error { code, message } => {
                        json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
                    }
                };
                let mut template = ResponseTemplate::new(200).set_body_json(body);
                if let Some(delay) = rule.delay {
                    template = template.set_delay(delay);
                }
                return template;
            }
        }
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("no rule for {method}")},
        }))
    }
}

/// A JSON-RPC endpoint answering from a list of method rules, echoing
/// request ids so any client-side id matching stays happy.
pub(crate) struct MockRpc {
    server: MockServer,
    rules: Arc<RwLock<Vec<Rule>>>,
}

impl MockRpc {
    pub async fn start() -> Self {
        let rules: Arc<RwLock<Vec<Rule>>> = Arc::new(RwLock::new(Vec::new()));
        let server = MockServer::start().await;
        Mock::given(http_method("POST"))
            .respond_with(Responder {
                rules: rules.clone(),
            })
            .mount(&server)
            .await;
        Self { server, rules }
    }

    pub fn url(&self) -> Url {
        Url::parse(&self.server.uri()).expect("mock server uri")
    }

    fn push(&self, rule: Rule) {
        self.rules.write().push(rule);
    }

    pub async fn on(&self, method: &str, result: Value) {
        self.push(Rule {
            method: method.to_string(),
            param_contains: None,
            response: RuleResponse::Result(result),
            delay: None,
        });
    }

    /// Responds only when the serialized params contain `needle`;
    /// earlier rules win, so register specific rules first.
    pub async fn on_match(&self, method: &str, needle: &str, result: Value) {
        self.push(Rule {
            method: method.to_string(),
            param_contains: Some(needle.to_string()),
            response: RuleResponse::Result(result),
            delay: None,
        });
    }

    pub async fn on_delayed(&self, method: &str, result: Value, delay: Duration) {
        self.push(Rule {
            method: method.to_string(),
            param_contains: None,
            response: RuleResponse::Result(result),
            delay: Some(delay),
        });
    }

    pub async fn on_error(&self, method: &str, code: i64, message: &str) {
        self.push(Rule {
            method: method.to_string(),
            param_contains: None,
            response: RuleResponse::Error {
                code,
                message: message.to_string(),
            },
            delay: None,
        });
    }
}

const ZERO_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

fn zero_bloom() -> String {
    format!("0x{}", "00".repeat(256))
}

/// Wire-format legacy transaction as nodes return it inside full blocks.
pub(crate) fn legacy_tx_json(
    hash: &str,
    from: &str,
    to: Option<&str>,
    value_hex: &str,
    input_hex: &str,
    block_number_hex: &str,
) -> Value {
    json!({
        "hash": hash,
        "nonce": "0x1",
        "blockHash": ZERO_HASH,
        "blockNumber": block_number_hex,
        "transactionIndex": "0x0",
        "from": from,
        "to": to,
        "value": value_hex,
        "gas": "0x5208",
        "gasPrice": "0x3b9aca00",
        "input": input_hex,
        "v": "0x1b",
        "r": "0x1",
        "s": "0x1",
    })
}

pub(crate) fn block_json(number_hex: &str, hash: &str, transactions: Vec<Value>) -> Value {
    json!({
        "hash": hash,
        "parentHash": ZERO_HASH,
        "sha3Uncles": "0x1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347",
        "miner": "0x0000000000000000000000000000000000000000",
        "stateRoot": ZERO_HASH,
        "transactionsRoot": ZERO_HASH,
        "receiptsRoot": ZERO_HASH,
        "logsBloom": zero_bloom(),
        "difficulty": "0x0",
        "number": number_hex,
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x5208",
        "timestamp": "0x650000",
        "extraData": "0x",
        "mixHash": ZERO_HASH,
        "nonce": "0x0000000000000000",
        "baseFeePerGas": "0x7",
        "size": "0x220",
        "uncles": [],
        "transactions": transactions,
    })
}

pub(crate) fn log_json(address: &str, block_number_hex: &str, tx_hash: &str, index: u64) -> Value {
    json!({
        "address": address,
        "topics": [],
        "data": "0x",
        "blockNumber": block_number_hex,
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "blockHash": ZERO_HASH,
        "logIndex": format!("0x{index:x}"),
        "removed": false,
    })
}

pub(crate) fn receipt_json(
    tx_hash: &str,
    from: &str,
    to: Option<&str>,
    block_number_hex: &str,
    success: bool,
    logs: Vec<Value>,
) -> Value {
    json!({
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "blockHash": ZERO_HASH,
        "blockNumber": block_number_hex,
        "from": from,
        "to": to,
        "cumulativeGasUsed": "0x5208",
        "gasUsed": "0x5208",
        "contractAddress": null,
        "logs": logs,
        "logsBloom": zero_bloom(),
        "status": if success { "0x1" } else { "0x0" },
        "type": "0x0",
        "effectiveGasPrice": "0x3b9aca00",
    })
}
