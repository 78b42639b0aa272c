//! Local address naming: the `ens` cache table plus the shared `cex`
//! tags, loaded eagerly at startup.

use std::collections::HashMap;

use alloy::primitives::Address;
use sea_orm::DatabaseConnection;

use crate::repository;

pub struct AddressBook {
    names: HashMap<Address, String>,
}

impl AddressBook {
    pub fn from_entries(entries: impl IntoIterator<Item = (Address, String)>) -> Self {
        Self {
            names: entries.into_iter().collect(),
        }
    }

    pub async fn load(
        cache_db: &DatabaseConnection,
        shared_db: &DatabaseConnection,
    ) -> anyhow::Result<Self> {
        let mut names = HashMap::new();
        for row in repository::ens::load_all(cache_db).await? {
            if let Ok(address) = row.address.parse::<Address>() {
                names.insert(address, row.name);
            }
        }
        // exchange tags fill the gaps but never shadow a local name
        for row in repository::cex::load_all(shared_db).await? {
            if let Ok(address) = row.address.parse::<Address>() {
                names.entry(address).or_insert(row.name);
            }
        }
        tracing::info!(count = names.len(), "address book loaded");
        Ok(Self { names })
    }

    pub fn get(&self, address: &Address) -> Option<&str> {
        self.names.get(address).map(String::as_str)
    }

    /// Display name with checksum-cased fallback.
    pub fn display(&self, address: &Address) -> String {
        match self.get(address) {
            Some(name) => name.to_string(),
            None => address.to_checksum(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn falls_back_to_checksum_casing() {
        let named = address!("00000000219ab540356cBB839Cbe05303d7705Fa");
        let anonymous = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        let book = AddressBook::from_entries([(named, "deposit contract".to_string())]);

        assert_eq!(book.display(&named), "deposit contract");
        assert_eq!(
            book.display(&anonymous),
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
        );
    }
}
