//! Request-body normalization into a single [`Event`] record.

use serde_json::Value;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::event::{BodySource, Event, EventKind, RawBody, ShopItem};

/// Decode an inbound webhook body into a normalized event.
///
/// Tried in order: a non-empty `data` field when the body is declared form
/// encoded, then the body itself when the content type declares JSON, then
/// the undecoded bytes as an `Unknown` event. Decoding never fails;
/// malformed input falls through to the next strategy.
pub fn extract_event(content_type: Option<&str>, body: &[u8]) -> Event {
    if declares(content_type, "application/x-www-form-urlencoded") {
        if let Some(data) = form_field(body, "data").filter(|d| !d.trim().is_empty()) {
            match serde_json::from_str::<Value>(&data) {
                Ok(value) => return event_from_value(&value, BodySource::FormField, body),
                Err(err) => warn!(%err, "form `data` field is not valid JSON"),
            }
        }
    }
    if declares(content_type, "json") {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => return event_from_value(&value, BodySource::JsonBody, body),
            Err(err) => warn!(%err, "declared JSON body failed to parse"),
        }
    }
    debug!(bytes = body.len(), "no structured payload, recording raw event");
    Event::unparsed(body.to_vec())
}

/// Whether the declared content type mentions `needle`.
fn declares(content_type: Option<&str>, needle: &str) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains(needle))
}

/// Pull a single field out of a urlencoded body.
pub fn form_field(body: &[u8], name: &str) -> Option<String> {
    form_urlencoded::parse(body)
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Fetch a trimmed, non-empty string field.
fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// The platform sends amounts as decimal strings; tolerate bare numbers.
fn amount_field(value: &Value) -> Option<String> {
    match value.get("amount") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn shop_item_from_value(value: &Value) -> Option<ShopItem> {
    let direct_link_code = text_field(value, "direct_link_code")?;
    Some(ShopItem {
        direct_link_code,
        item_name: text_field(value, "item_name"),
        variation_name: text_field(value, "variation_name"),
        quantity: value
            .get("quantity")
            .and_then(Value::as_u64)
            .map(|q| q as u32),
    })
}

fn event_from_value(value: &Value, source: BodySource, body: &[u8]) -> Event {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(EventKind::from_type_field)
        .unwrap_or(EventKind::Unknown);
    let shop_items: Vec<ShopItem> = value
        .get("shop_items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(shop_item_from_value).collect())
        .unwrap_or_default();
    // Membership payloads carry `tier_name`; shop payloads name their items.
    let tier_or_product = text_field(value, "tier_name")
        .or_else(|| shop_items.first().and_then(|item| item.item_name.clone()))
        .or_else(|| text_field(value, "product_name"));
    Event {
        kind,
        message_id: text_field(value, "message_id"),
        timestamp: text_field(value, "timestamp"),
        from_name: text_field(value, "from_name"),
        message: text_field(value, "message"),
        amount: amount_field(value),
        currency: text_field(value, "currency"),
        email: text_field(value, "email"),
        tier_or_product,
        shop_items,
        verification_token: text_field(value, "verification_token"),
        raw: RawBody::new(source, body.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: &str = "application/x-www-form-urlencoded";

    fn form_body(json: &str) -> Vec<u8> {
        form_urlencoded::Serializer::new(String::new())
            .append_pair("data", json)
            .finish()
            .into_bytes()
    }

    #[test]
    fn decodes_json_from_form_data_field() {
        let body = form_body(
            r#"{"type":"Donation","from_name":"Jo","message":"hi","amount":"3.00",
               "currency":"USD","email":"jo@example.org","verification_token":"tok"}"#,
        );
        let ev = extract_event(Some(FORM), &body);
        assert_eq!(ev.kind, EventKind::Donation);
        assert_eq!(ev.from_name.as_deref(), Some("Jo"));
        assert_eq!(ev.amount.as_deref(), Some("3.00"));
        assert_eq!(ev.verification_token.as_deref(), Some("tok"));
        assert_eq!(ev.raw.source, BodySource::FormField);
        assert_eq!(ev.raw.bytes, body);
    }

    #[test]
    fn decodes_declared_json_body() {
        let body = br#"{"type":"Subscription","tier_name":"Gold","email":"s@example.org"}"#;
        let ev = extract_event(Some("application/json; charset=utf-8"), body);
        assert_eq!(ev.kind, EventKind::Subscription);
        assert_eq!(ev.tier_or_product.as_deref(), Some("Gold"));
        assert_eq!(ev.raw.source, BodySource::JsonBody);
    }

    #[test]
    fn undeclared_bytes_become_unknown() {
        let ev = extract_event(None, b"\x00\x01 not a payload");
        assert_eq!(ev.kind, EventKind::Unknown);
        assert_eq!(ev.raw.source, BodySource::Raw);
        assert!(ev.message.is_none());
    }

    #[test]
    fn malformed_data_field_falls_through_to_raw() {
        let body = b"data=%7Bnot-json";
        let ev = extract_event(Some(FORM), body);
        assert_eq!(ev.kind, EventKind::Unknown);
        assert_eq!(ev.raw.source, BodySource::Raw);
        assert_eq!(ev.raw.bytes, body);
    }

    #[test]
    fn malformed_json_body_falls_through_to_raw() {
        let ev = extract_event(Some("application/json"), b"{oops");
        assert_eq!(ev.kind, EventKind::Unknown);
        assert_eq!(ev.raw.source, BodySource::Raw);
    }

    #[test]
    fn empty_data_field_is_ignored() {
        let ev = extract_event(Some(FORM), b"data=");
        assert_eq!(ev.kind, EventKind::Unknown);
        assert_eq!(ev.raw.source, BodySource::Raw);
    }

    #[test]
    fn shop_items_and_product_fallbacks() {
        let body = form_body(
            r#"{"type":"Shop Order","email":"b@example.org","shop_items":[
                 {"direct_link_code":"2d36c00264","item_name":"Nostr handle","quantity":1},
                 {"direct_link_code":"ffff000000"},
                 {"item_name":"no code, dropped"}]}"#,
        );
        let ev = extract_event(Some(FORM), &body);
        assert_eq!(ev.kind, EventKind::ShopOrder);
        assert_eq!(ev.shop_items.len(), 2);
        assert_eq!(ev.shop_items[0].direct_link_code, "2d36c00264");
        assert_eq!(ev.shop_items[0].quantity, Some(1));
        assert_eq!(ev.shop_items[1].item_name, None);
        assert_eq!(ev.tier_or_product.as_deref(), Some("Nostr handle"));
    }

    #[test]
    fn tier_name_outranks_item_name() {
        let body = form_body(
            r#"{"type":"Subscription","tier_name":"Silver",
               "shop_items":[{"direct_link_code":"x1","item_name":"Sticker"}]}"#,
        );
        let ev = extract_event(Some(FORM), &body);
        assert_eq!(ev.tier_or_product.as_deref(), Some("Silver"));
    }

    #[test]
    fn product_name_is_last_resort() {
        let body = form_body(r#"{"type":"Shop Order","product_name":"Mug"}"#);
        let ev = extract_event(Some(FORM), &body);
        assert_eq!(ev.tier_or_product.as_deref(), Some("Mug"));
    }

    #[test]
    fn numeric_amount_is_stringified() {
        let body = form_body(r#"{"type":"Donation","amount":5.5}"#);
        let ev = extract_event(Some(FORM), &body);
        assert_eq!(ev.amount.as_deref(), Some("5.5"));
    }

    #[test]
    fn unknown_type_string_is_preserved_as_unknown() {
        let body = form_body(r#"{"type":"Commission","from_name":"Jo"}"#);
        let ev = extract_event(Some(FORM), &body);
        assert_eq!(ev.kind, EventKind::Unknown);
        assert_eq!(ev.from_name.as_deref(), Some("Jo"));
    }

    #[test]
    fn form_field_reads_percent_encoding() {
        assert_eq!(
            form_field(b"a=1&data=%7B%22x%22%3A1%7D&b=2", "data"),
            Some(r#"{"x":1}"#.to_string())
        );
        assert_eq!(form_field(b"a=1", "data"), None);
    }
}
