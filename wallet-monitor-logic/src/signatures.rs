//! Selector to text-signature resolution: embedded cache first, then
//! two public signature directories raced in parallel.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use futures::future::select_ok;
use parking_lot::RwLock;
use reqwest::Client;
use sea_orm::DatabaseConnection;
use serde::Deserialize;

use crate::{repository, settings::SignatureSettings};

pub struct SignatureLookup {
    db: Arc<DatabaseConnection>,
    http: Client,
    settings: SignatureSettings,
    memo: RwLock<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct FourByteResponse {
    results: Vec<FourByteEntry>,
}

#[derive(Deserialize)]
struct FourByteEntry {
    id: i64,
    text_signature: String,
}

#[derive(Deserialize)]
struct OpenchainResponse {
    ok: bool,
    result: OpenchainResult,
}

#[derive(Deserialize)]
struct OpenchainResult {
    function: HashMap<String, Option<Vec<OpenchainEntry>>>,
}

#[derive(Deserialize)]
struct OpenchainEntry {
    name: String,
}

impl SignatureLookup {
    pub fn new(db: Arc<DatabaseConnection>, settings: SignatureSettings) -> Self {
        Self {
            db,
            http: Client::new(),
            settings,
            memo: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves a `0x`-prefixed 4-byte selector to a signature. The
    /// answer is decorative, so every failure mode collapses to
    /// `None`. Positives are memoized and persisted; negatives are
    /// retried on the next sighting.
    pub async fn resolve(&self, selector: &str) -> Option<String> {
        let selector = selector.to_lowercase();
        if selector.len() != 10 || !selector.starts_with("0x") {
            return None;
        }
        if let Some(hit) = self.memo.read().get(&selector) {
            return Some(hit.clone());
        }
        match repository::selectors::get(&self.db, &selector).await {
            Ok(Some(row)) => {
                self.memo
                    .write()
                    .entry(selector)
                    .or_insert_with(|| row.signature.clone());
                return Some(row.signature);
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = ?err, "selector cache read failed"),
        }

        let fetched = self.fetch_remote(&selector).await?;
        if let Err(err) =
            repository::selectors::insert_if_absent(&self.db, &selector, &fetched).await
        {
            tracing::warn!(selector = %selector, error = ?err, "failed to persist signature");
        }
        self.memo
            .write()
            .entry(selector)
            .or_insert_with(|| fetched.clone());
        Some(fetched)
    }

    /// Both directories race; the first real answer wins.
    async fn fetch_remote(&self, selector: &str) -> Option<String> {
        let lookups: Vec<Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>> = vec![
            Box::pin(self.query_fourbyte(selector)),
            Box::pin(self.query_openchain(selector)),
        ];
        match select_ok(lookups).await {
            Ok((signature, _rest)) => Some(signature),
            Err(err) => {
                tracing::debug!(selector = %selector, error = %err, "selector not found in directories");
                None
            }
        }
    }

    async fn query_fourbyte(&self, selector: &str) -> anyhow::Result<String> {
        let mut url = self
            .settings
            .fourbyte_base_url
            .join("/api/v1/signatures/")?;
        url.query_pairs_mut().append_pair("hex_signature", selector);
        let response: FourByteResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        // the oldest entry is the least likely to be squatted
        let entry = response
            .results
            .into_iter()
            .min_by_key(|entry| entry.id)
            .ok_or_else(|| anyhow::anyhow!("no 4byte match"))?;
        validate(selector, entry.text_signature)
    }

    async fn query_openchain(&self, selector: &str) -> anyhow::Result<String> {
        let mut url = self
            .settings
            .openchain_base_url
            .join("/signature-database/v1/lookup")?;
        url.query_pairs_mut()
            .append_pair("function", selector)
            .append_pair("filter", "true");
        let mut response: OpenchainResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        anyhow::ensure!(response.ok, "openchain lookup reported failure");
        let entry = response
            .result
            .function
            .remove(selector)
            .flatten()
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no openchain match"))?;
        validate(selector, entry.name)
    }
}

/// A usable answer is non-empty and not just the selector echoed back.
fn validate(selector: &str, signature: String) -> anyhow::Result<String> {
    let trimmed = signature.trim().to_string();
    anyhow::ensure!(
        !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case(selector),
        "directory answer is not a signature"
    );
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;
    use serde_json::json;
    use url::Url;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    const TRANSFER: &str = "0xa9059cbb";

    async fn cache_db() -> Arc<DatabaseConnection> {
        use migration::MigratorTrait;
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::LocalMigrator::up(&db, None).await.unwrap();
        Arc::new(db)
    }

    fn settings(fourbyte: &MockServer, openchain: &MockServer) -> SignatureSettings {
        SignatureSettings {
            fourbyte_base_url: Url::parse(&fourbyte.uri()).unwrap(),
            openchain_base_url: Url::parse(&openchain.uri()).unwrap(),
        }
    }

    #[tokio::test]
    async fn resolves_prefers_the_oldest_fourbyte_entry_and_memoizes() {
        let fourbyte = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/signatures/"))
            .and(query_param("hex_signature", TRANSFER))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": 31781, "text_signature": "many_msg_babbage(bytes1)"},
                    {"id": 145, "text_signature": "transfer(address,uint256)"},
                ]
            })))
            .expect(1)
            .mount(&fourbyte)
            .await;
        let openchain = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&openchain)
            .await;

        let db = cache_db().await;
        let lookup = SignatureLookup::new(db.clone(), settings(&fourbyte, &openchain));

        assert_eq!(
            lookup.resolve(TRANSFER).await,
            Some("transfer(address,uint256)".to_string())
        );
        // second call is served from the memo, not the directory
        assert_eq!(
            lookup.resolve(TRANSFER).await,
            Some("transfer(address,uint256)".to_string())
        );
        let row = repository::selectors::get(&db, TRANSFER).await.unwrap();
        assert_eq!(row.unwrap().signature, "transfer(address,uint256)");
    }

    #[tokio::test]
    async fn openchain_answers_when_fourbyte_is_down() {
        let fourbyte = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&fourbyte)
            .await;
        let openchain = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/signature-database/v1/lookup"))
            .and(query_param("function", TRANSFER))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"function": {"0xa9059cbb": [{"name": "transfer(address,uint256)"}]}}
            })))
            .mount(&openchain)
            .await;

        let db = cache_db().await;
        let lookup = SignatureLookup::new(db, settings(&fourbyte, &openchain));
        assert_eq!(
            lookup.resolve(TRANSFER).await,
            Some("transfer(address,uint256)".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_selectors_resolve_to_none() {
        let fourbyte = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&fourbyte)
            .await;
        let openchain = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"function": {}}
            })))
            .mount(&openchain)
            .await;

        let db = cache_db().await;
        let lookup = SignatureLookup::new(db, settings(&fourbyte, &openchain));
        assert_eq!(lookup.resolve("0xdeadbeef").await, None);
        assert_eq!(lookup.resolve("0x").await, None);
    }
}
