//! Wire types for the upstream chain-event API.
//!
//! The API is trusted and out of scope for this crate to validate beyond
//! basic shape; fields this crate never reads are not modeled.

use serde::Deserialize;

/// One entry from `GET /v2/blockchain/accounts/{address}/transactions`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    pub hash: String,
    #[serde(deserialize_with = "deserialize_lt")]
    pub lt: u64,
    pub utime: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionsPage {
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

/// `GET /v2/events/{tx_hash}` response: an action tree, zero or more of
/// which may carry a swap payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub event_id: Option<String>,
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Event {
    /// The first action of kind `"swap"` (aliased `"JettonSwap"` on the
    /// wire) carrying a swap payload, if any. The type tag is checked, not
    /// just the payload shape, since other action kinds are not modeled
    /// here and could coincidentally carry the same field names.
    pub fn swap_action(&self) -> Option<&SwapPayload> {
        self.actions
            .iter()
            .filter(|a| a.kind == "swap" || a.kind == "JettonSwap")
            .find_map(|a| a.swap.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(alias = "JettonSwap", alias = "swap")]
    pub swap: Option<SwapPayload>,
}

/// The action payload of kind "swap" (native-coin/tracked-asset exchange).
#[derive(Debug, Clone, Deserialize)]
pub struct SwapPayload {
    pub ton_in: Option<i64>,
    pub ton_out: Option<i64>,
    pub amount_in: Option<String>,
    pub amount_out: Option<String>,
    pub user_wallet: Option<AddressRef>,
    pub jetton_master_in: Option<AddressRef>,
    pub jetton_master_out: Option<AddressRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressRef {
    pub address: String,
}

/// One `(unix_timestamp, price)` point from `GET /v2/rates/chart`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PricePoint {
    pub timestamp: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceChart {
    #[serde(default)]
    pub points: Vec<(i64, f64)>,
}

impl PriceChart {
    pub fn into_points(self) -> Vec<PricePoint> {
        self.points
            .into_iter()
            .map(|(timestamp, price)| PricePoint { timestamp, price })
            .collect()
    }
}

/// One JSON line from `GET /v2/sse/accounts/transactions`.
#[derive(Debug, Clone, Deserialize)]
pub struct SseItem {
    pub event_id: String,
    #[serde(deserialize_with = "deserialize_lt")]
    pub lt: u64,
    pub timestamp: i64,
    #[allow(dead_code)]
    pub account_id: Option<String>,
}

/// `lt` arrives as either a JSON number or a decimal string depending on
/// endpoint; accept either, always yielding a `u64`.
fn deserialize_lt<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LtValue {
        Number(u64),
        Text(String),
    }

    match LtValue::deserialize(deserializer)? {
        LtValue::Number(n) => Ok(n),
        LtValue::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_action_is_found_among_others() {
        let event: Event = serde_json::from_value(serde_json::json!({
            "event_id": "e1",
            "timestamp": 100,
            "actions": [
                {"type": "TonTransfer"},
                {"type": "JettonSwap", "JettonSwap": {
                    "ton_in": 1_500_000_000i64,
                    "amount_out": "250000000000",
                    "user_wallet": {"address": "0:aa"},
                    "jetton_master_out": {"address": "0:tracked"}
                }}
            ]
        }))
        .unwrap();

        let swap = event.swap_action().expect("swap action present");
        assert_eq!(swap.ton_in, Some(1_500_000_000));
        assert_eq!(swap.amount_out.as_deref(), Some("250000000000"));
    }

    #[test]
    fn lt_accepts_string_or_number() {
        let from_number: RawTransaction =
            serde_json::from_value(serde_json::json!({"hash": "h", "lt": 100, "utime": 1})).unwrap();
        let from_string: RawTransaction =
            serde_json::from_value(serde_json::json!({"hash": "h", "lt": "100", "utime": 1})).unwrap();
        assert_eq!(from_number.lt, 100);
        assert_eq!(from_string.lt, 100);
    }
}
