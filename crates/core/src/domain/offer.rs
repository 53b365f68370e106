use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::domain::capacity::CapacityRecord;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SupplierId(pub String);

impl fmt::Display for SupplierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SupplierId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProductPrice {
    #[serde(deserialize_with = "lenient_u32")]
    pub quantity: u32,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub cash_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub loan_installment: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Offer {
    pub product_type: String,
    pub product_name: String,
    #[serde(default)]
    pub product_prices: Vec<ProductPrice>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SupplierOffer {
    #[serde(rename = "SupplierID")]
    pub supplier_id: SupplierId,
    #[serde(default)]
    pub service_areas: Vec<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub capacity: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub used: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_pct: Option<f64>,
    #[serde(default)]
    pub offers: Vec<Offer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Immutable supplier catalog. Mutable capacity lives in the capacity file;
/// `with_capacity` overlays the current ledger for presentation only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferCatalog {
    #[serde(rename = "SupplierOffers")]
    pub supplier_offers: Vec<SupplierOffer>,
}

impl OfferCatalog {
    pub fn with_capacity<'a, I>(&self, records: I) -> OfferCatalog
    where
        I: IntoIterator<Item = &'a CapacityRecord>,
    {
        let mut snapshot = self.clone();
        for record in records {
            if let Some(offer) = snapshot
                .supplier_offers
                .iter_mut()
                .find(|offer| offer.supplier_id == record.supplier_id)
            {
                offer.capacity = record.capacity;
                offer.used = record.used;
                offer.used_pct = Some(record.used_pct);
            }
        }
        snapshot
    }
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => u32::try_from(value).map_err(serde::de::Error::custom),
        Raw::Float(value) if value >= 0.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX) => {
            Ok(value as u32)
        }
        Raw::Float(value) => Err(serde::de::Error::custom(format!("expected a count, got {value}"))),
        Raw::Text(text) => text.trim().parse::<u32>().map_err(serde::de::Error::custom),
    }
}
