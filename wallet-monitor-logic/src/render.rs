//! Chat-message rendering. Pure: identical inputs produce identical
//! bytes, so the fast and full phases can share one code path.

use std::sync::Arc;

use alloy::primitives::Address;

use crate::{
    chain::types::Transaction,
    names::AddressBook,
    settings::{ButtonTemplate, ChainSettings},
    telegram::client::{InlineKeyboardButton, InlineKeyboardMarkup},
    trace::{TraceResult, TxStatus},
};

/// Substituted with the per-watcher display name at delivery time.
pub const NAME_PLACEHOLDER: &str = "$$NAME$$";
/// Substituted with the token address when building button URLs.
pub const ADDRESS_PLACEHOLDER: &str = "$$ADDRESS$$";

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub chain_label: String,
    pub native_symbol: String,
    pub explorer_base_url: String,
    pub inline_buttons: Vec<Vec<ButtonTemplate>>,
    base_tokens: Vec<String>,
}

impl RenderConfig {
    /// Buttons fall back to a single chart row when none are
    /// configured and a chart base url is available.
    pub fn new(chain: &ChainSettings, inline_buttons: Vec<Vec<ButtonTemplate>>) -> Self {
        let inline_buttons = if inline_buttons.is_empty() && !chain.chart_base_url.is_empty() {
            vec![vec![ButtonTemplate {
                text: "📈 Chart".to_string(),
                url_template: format!(
                    "{}/{}",
                    chain.chart_base_url.trim_end_matches('/'),
                    ADDRESS_PLACEHOLDER
                ),
            }]]
        } else {
            inline_buttons
        };
        Self {
            chain_label: chain.chain_label.clone(),
            native_symbol: chain.native_symbol.clone(),
            explorer_base_url: chain.explorer_base_url.trim_end_matches('/').to_string(),
            inline_buttons,
            base_tokens: chain
                .base_tokens
                .iter()
                .map(|symbol| symbol.to_uppercase())
                .collect(),
        }
    }

    fn is_base(&self, symbol: &str) -> bool {
        let upper = symbol.to_uppercase();
        self.base_tokens.iter().any(|base| *base == upper)
    }
}

pub struct Renderer {
    config: RenderConfig,
    names: Arc<AddressBook>,
}

impl Renderer {
    pub fn new(config: RenderConfig, names: Arc<AddressBook>) -> Self {
        Self { config, names }
    }

    pub fn render(
        &self,
        watched: Address,
        tx: &Transaction,
        trace: &TraceResult,
        signature: Option<&str>,
    ) -> (String, Option<InlineKeyboardMarkup>) {
        let mut lines = Vec::new();

        lines.push(format!(
            "{}{} <b>{}</b> <i>#{}</i>",
            status_prefix(trace.status),
            self.direction_label(watched, tx, trace),
            html_escape(&self.config.chain_label),
            trace.block,
        ));

        let to_side = match tx.to {
            Some(to) => self.address_link(to, watched),
            None => "contract creation".to_string(),
        };
        lines.push(format!(
            "{} → {}",
            self.address_link(tx.from, watched),
            to_side
        ));

        let call_label = match signature {
            Some(signature) => html_escape(signature),
            None => tx.selector(),
        };
        let mut call_line = format!(
            "<a href=\"{}/tx/{:#x}\">{}</a>",
            self.config.explorer_base_url, tx.hash, call_label
        );
        if let Some(count) = trace.log_count {
            call_line.push_str(&format!(" | logs: {count}"));
        }
        lines.push(call_line);

        if !trace.tokens.is_empty() {
            let symbols: Vec<String> = trace
                .tokens
                .iter()
                .map(|(_, symbol)| html_escape(symbol))
                .collect();
            lines.push(format!("Tokens: {}", symbols.join(", ")));
        }

        if let (Some(amount), Some((_, symbol))) = (&trace.transfer_amount, trace.tokens.first()) {
            lines.push(format!("Amount: {amount} {}", html_escape(symbol)));
        }

        if let Some(contract) = trace.deployed_contract {
            lines.push(format!("Deployed: {}", self.address_link(contract, watched)));
        }

        lines.push(format!(
            "PNL: {} {} {native} | BAL: {} {native}",
            trace.change.glyph(),
            trace.pnl,
            trace.balance,
            native = self.config.native_symbol,
        ));

        lines.push(NAME_PLACEHOLDER.to_string());

        (lines.join("\n"), self.keyboard(trace))
    }

    fn direction_label(
        &self,
        watched: Address,
        tx: &Transaction,
        trace: &TraceResult,
    ) -> &'static str {
        if trace.tokens.len() > 1 {
            // a failed interaction and a zero-value swap both read as
            // a sell; everything else with value attached is a buy
            if matches!(trace.status, TxStatus::Failed) || tx.value.is_zero() {
                "🔴 SELL"
            } else {
                "🟢 BUY"
            }
        } else if trace.tokens.len() == 1 && trace.transfer_amount.is_some() {
            if watched == tx.from {
                "💰➡️"
            } else {
                "➡️💰"
            }
        } else if tx.to == Some(watched) {
            "↘"
        } else {
            "↖"
        }
    }

    fn address_link(&self, address: Address, watched: Address) -> String {
        let bullet = if address == watched { "● " } else { "" };
        let display = html_escape(&self.names.display(&address));
        format!(
            "{bullet}<a href=\"{}/address/{:#x}\">{display}</a>",
            self.config.explorer_base_url, address
        )
    }

    /// Buttons appear only when a non-base token interacted.
    fn keyboard(&self, trace: &TraceResult) -> Option<InlineKeyboardMarkup> {
        let (token, _) = trace
            .tokens
            .iter()
            .find(|(_, symbol)| !self.config.is_base(symbol))?;
        if self.config.inline_buttons.is_empty() {
            return None;
        }
        let address = format!("{token:#x}");
        let inline_keyboard = self
            .config
            .inline_buttons
            .iter()
            .map(|row| {
                row.iter()
                    .map(|template| InlineKeyboardButton {
                        text: template.text.clone(),
                        url: template.url_template.replace(ADDRESS_PLACEHOLDER, &address),
                    })
                    .collect()
            })
            .collect();
        Some(InlineKeyboardMarkup { inline_keyboard })
    }
}

fn status_prefix(status: TxStatus) -> String {
    let glyph = status.glyph();
    if glyph.is_empty() {
        String::new()
    } else {
        format!("{glyph} ")
    }
}

pub fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::types::TxOrigin,
        trace::{BlockRef, ChangeIndicator},
    };
    use alloy::primitives::{address, Bytes, B256, U256};
    use std::time::Duration;
    use url::Url;

    const WATCHED: Address = address!("00000000219ab540356cBB839Cbe05303d7705Fa");
    const OTHER: Address = address!("6B175474E89094C44Da98b954EedeAC495271d0F");
    const PEPE: Address = address!("6982508145454Ce325dDbE47a25d4ec3d2311933");
    const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

    fn chain_settings() -> ChainSettings {
        ChainSettings {
            rpc_urls: vec![Url::parse("http://127.0.0.1:1").unwrap()],
            chain_label: "ETH".to_string(),
            native_symbol: "ETH".to_string(),
            multicall_address: address!("cA11bde05977b3631167028862bE2a173976CA11"),
            explorer_base_url: "https://etherscan.io".to_string(),
            chart_base_url: "https://dexscreener.com/ethereum".to_string(),
            base_tokens: vec!["WETH".to_string()],
            rpc_timeout: Duration::from_secs(3),
        }
    }

    fn renderer() -> Renderer {
        let config = RenderConfig::new(&chain_settings(), Vec::new());
        let names = Arc::new(crate::names::AddressBook::from_entries([(
            WATCHED,
            "whale wallet".to_string(),
        )]));
        Renderer::new(config, names)
    }

    fn tx(value: U256, to: Option<Address>) -> Transaction {
        Transaction {
            hash: B256::repeat_byte(0xab),
            block_number: Some(100),
            block_hash: None,
            index: Some(0),
            from: WATCHED,
            to,
            nonce: 0,
            gas_limit: 21_000,
            gas_price: Some(1),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            input: Bytes::new(),
            value,
            chain_id: Some(1),
            origin: TxOrigin::Block,
        }
    }

    fn trace(tokens: Vec<(Address, String)>, status: TxStatus) -> TraceResult {
        TraceResult {
            status,
            tokens,
            log_count: Some(3),
            block: BlockRef::Number(100),
            deployed_contract: None,
            pnl: "0.5".to_string(),
            balance: "12.0".to_string(),
            change: ChangeIndicator::Up,
            transfer_amount: None,
        }
    }

    #[test]
    fn rendering_is_deterministic() {
        let renderer = renderer();
        let tx = tx(U256::ZERO, Some(OTHER));
        let trace = trace(vec![(PEPE, "PEPE".to_string())], TxStatus::Success);
        let first = renderer.render(WATCHED, &tx, &trace, Some("transfer(address,uint256)"));
        let second = renderer.render(WATCHED, &tx, &trace, Some("transfer(address,uint256)"));
        assert_eq!(first, second);
    }

    #[test]
    fn multi_token_interactions_read_as_buy_or_sell() {
        let renderer = renderer();
        let tokens = vec![(PEPE, "PEPE".to_string()), (WETH, "WETH".to_string())];

        let (sell, _) = renderer.render(
            WATCHED,
            &tx(U256::ZERO, Some(OTHER)),
            &trace(tokens.clone(), TxStatus::Success),
            None,
        );
        assert!(sell.contains("🔴 SELL"));

        let (buy, _) = renderer.render(
            WATCHED,
            &tx(U256::from(1u64), Some(OTHER)),
            &trace(tokens.clone(), TxStatus::Success),
            None,
        );
        assert!(buy.contains("🟢 BUY"));

        let (failed, _) = renderer.render(
            WATCHED,
            &tx(U256::from(1u64), Some(OTHER)),
            &trace(tokens, TxStatus::Failed),
            None,
        );
        assert!(failed.contains("🔴 SELL"));
        assert!(failed.starts_with("❌ "));
    }

    #[test]
    fn single_transfer_overrides_the_direction_icon() {
        let renderer = renderer();
        let mut outgoing = trace(vec![(PEPE, "PEPE".to_string())], TxStatus::Unknown);
        outgoing.transfer_amount = Some("100.00".to_string());

        let (text, _) = renderer.render(WATCHED, &tx(U256::ZERO, Some(PEPE)), &outgoing, None);
        assert!(text.contains("💰➡️"));
        assert!(text.contains("Amount: 100.00 PEPE"));

        let mut incoming_tx = tx(U256::ZERO, Some(PEPE));
        incoming_tx.from = OTHER;
        let (text, _) = renderer.render(WATCHED, &incoming_tx, &outgoing, None);
        assert!(text.contains("➡️💰"));
    }

    #[test]
    fn plain_transfers_use_the_arrow_icons() {
        let renderer = renderer();
        let incoming = tx(U256::from(1u64), Some(WATCHED));
        let (text, _) = renderer.render(WATCHED, &incoming, &trace(vec![], TxStatus::Unknown), None);
        assert!(text.contains('↘'));

        let outgoing = tx(U256::from(1u64), Some(OTHER));
        let (text, _) = renderer.render(WATCHED, &outgoing, &trace(vec![], TxStatus::Unknown), None);
        assert!(text.contains('↖'));
    }

    #[test]
    fn watched_address_is_bulleted_and_named() {
        let renderer = renderer();
        let (text, _) = renderer.render(
            WATCHED,
            &tx(U256::ZERO, Some(OTHER)),
            &trace(vec![], TxStatus::Unknown),
            None,
        );
        assert!(text.contains("● <a"));
        assert!(text.contains("whale wallet"));
        assert!(text.contains(NAME_PLACEHOLDER));
    }

    #[test]
    fn buttons_only_appear_for_non_base_tokens() {
        let renderer = renderer();
        let (_, keyboard) = renderer.render(
            WATCHED,
            &tx(U256::ZERO, Some(OTHER)),
            &trace(vec![(WETH, "WETH".to_string())], TxStatus::Unknown),
            None,
        );
        assert!(keyboard.is_none());

        let (_, keyboard) = renderer.render(
            WATCHED,
            &tx(U256::ZERO, Some(OTHER)),
            &trace(vec![(PEPE, "PEPE".to_string())], TxStatus::Unknown),
            None,
        );
        let keyboard = keyboard.unwrap();
        assert_eq!(
            keyboard.inline_keyboard[0][0].url,
            format!("https://dexscreener.com/ethereum/{PEPE:#x}")
        );
    }

    #[test]
    fn display_names_are_html_escaped() {
        let config = RenderConfig::new(&chain_settings(), Vec::new());
        let names = Arc::new(crate::names::AddressBook::from_entries([(
            OTHER,
            "a <b>&</b> name".to_string(),
        )]));
        let renderer = Renderer::new(config, names);
        let (text, _) = renderer.render(
            WATCHED,
            &tx(U256::ZERO, Some(OTHER)),
            &trace(vec![], TxStatus::Unknown),
            None,
        );
        assert!(text.contains("a &lt;b&gt;&amp;&lt;/b&gt; name"));
    }
}
