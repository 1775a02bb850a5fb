//! Normalized representation of one platform payment notification.

use serde::{Deserialize, Serialize};

/// Notification categories carried in the platform's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// One-off donation.
    Donation,
    /// Recurring membership payment.
    Subscription,
    /// Shop purchase carrying one or more line items.
    #[serde(rename = "Shop Order")]
    ShopOrder,
    /// Anything else, including payloads that never parsed.
    Unknown,
}

impl EventKind {
    /// Map the platform's `type` string onto a known category.
    pub fn from_type_field(value: &str) -> Self {
        match value {
            "Donation" => EventKind::Donation,
            "Subscription" => EventKind::Subscription,
            "Shop Order" => EventKind::ShopOrder,
            _ => EventKind::Unknown,
        }
    }
}

/// One purchased line item on a shop order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopItem {
    /// Product code identifying the catalog item.
    pub direct_link_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

/// Which request surface yielded the structured payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodySource {
    /// JSON decoded from the request body itself.
    JsonBody,
    /// JSON carried inside the `data` form field.
    FormField,
    /// No structured payload could be decoded.
    Raw,
}

/// Original request body, retained verbatim for the audit trail.
///
/// Serializes as the source tag plus a bounded, lossily-decoded excerpt so
/// audit lines stay valid JSON even for binary bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawBodyRepr", into = "RawBodyRepr")]
pub struct RawBody {
    pub source: BodySource,
    pub bytes: Vec<u8>,
}

/// Longest raw-body excerpt written into an audit record.
const EXCERPT_LIMIT: usize = 2048;

impl RawBody {
    pub fn new(source: BodySource, bytes: Vec<u8>) -> Self {
        Self { source, bytes }
    }

    /// Lossy UTF-8 view of the body, truncated to a bounded length.
    pub fn excerpt(&self) -> String {
        let text = String::from_utf8_lossy(&self.bytes);
        match text.char_indices().nth(EXCERPT_LIMIT) {
            Some((idx, _)) => text[..idx].to_string(),
            None => text.into_owned(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawBodyRepr {
    source: BodySource,
    excerpt: String,
}

impl From<RawBody> for RawBodyRepr {
    fn from(raw: RawBody) -> Self {
        RawBodyRepr {
            source: raw.source,
            excerpt: raw.excerpt(),
        }
    }
}

impl From<RawBodyRepr> for RawBody {
    fn from(repr: RawBodyRepr) -> Self {
        RawBody {
            source: repr.source,
            bytes: repr.excerpt.into_bytes(),
        }
    }
}

/// One normalized payment notification.
///
/// All payload fields are optional; a notification that never parsed keeps
/// only its kind (`Unknown`) and the raw bytes. Example of a fully populated
/// shop order:
///
/// ```json
/// {
///   "kind": "Shop Order",
///   "message_id": "6f2e11aa",
///   "timestamp": "2024-03-01T12:00:00Z",
///   "from_name": "Jo",
///   "message": "handle: jo 7e7e...e7",
///   "amount": "5.00",
///   "currency": "USD",
///   "email": "jo@example.org",
///   "tier_or_product": "Nostr handle",
///   "shop_items": [{"direct_link_code": "2d36c00264"}],
///   "raw": {"source": "form-field", "excerpt": "data=%7B..."}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Payment amount kept as the platform's decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Membership tier or first product name, whichever the payload carries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_or_product: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shop_items: Vec<ShopItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
    pub raw: RawBody,
}

impl Event {
    /// Event for a body that produced no structured payload.
    pub fn unparsed(bytes: Vec<u8>) -> Self {
        Event {
            kind: EventKind::Unknown,
            message_id: None,
            timestamp: None,
            from_name: None,
            message: None,
            amount: None,
            currency: None,
            email: None,
            tier_or_product: None,
            shop_items: Vec::new(),
            verification_token: None,
            raw: RawBody::new(BodySource::Raw, bytes),
        }
    }
}
