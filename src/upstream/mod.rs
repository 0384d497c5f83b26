//! Client for the upstream chain-event API:
//! paginated transaction listing, single-event fetch, price-chart fetch,
//! and an SSE subscription, the only four operations this crate needs
//! from the chain.

mod client;
mod types;

pub use client::{is_rate_limited, SseStream, UpstreamClient, UpstreamError};
pub use types::{AddressRef, Event, PriceChart, PricePoint, RawTransaction, SseItem, SwapPayload, TransactionsPage};
