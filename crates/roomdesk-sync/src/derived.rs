//! Presentation fields computed from raw inputs.

use serde_json::{Map, Value, json};

use crate::entity::EntitySnapshot;

/// Recompute every derived field of `entity` from its current raw values.
pub fn recompute(entity: &mut EntitySnapshot, currency: &str) {
    let mut derived = Map::new();

    let players = entity.field("player_count").and_then(Value::as_f64);
    let capacity = entity.field("max_players").and_then(Value::as_f64);
    if let (Some(players), Some(capacity)) = (players, capacity) {
        if capacity > 0.0 {
            let pct = (players / capacity * 1000.0).round() / 10.0;
            let _ = derived.insert("occupancy_pct".into(), json!(pct));
        }
    }

    if let Some(pot) = entity.field("pot").and_then(Value::as_f64) {
        let _ = derived.insert("pot_formatted".into(), json!(format_currency(pot, currency)));
    }

    let started = entity.field("started_at").and_then(Value::as_i64);
    if let (Some(started), Some(as_of)) = (started, entity.updated_at()) {
        let _ = derived.insert("uptime".into(), json!(format_duration(as_of - started)));
    }

    entity.derived = derived;
}

/// `1234.5` → `$1,234.50` for known symbols, `1,234.50 CHF` otherwise.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn format_currency(amount: f64, currency: &str) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = group_thousands(cents / 100);
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    let number = format!("{whole}.{:02}", cents % 100);
    match currency_symbol(currency) {
        Some(symbol) => format!("{sign}{symbol}{number}"),
        None => format!("{sign}{number} {currency}"),
    }
}

fn currency_symbol(code: &str) -> Option<&'static str> {
    match code.to_ascii_uppercase().as_str() {
        "USD" => Some("$"),
        "EUR" => Some("€"),
        "GBP" => Some("£"),
        "JPY" => Some("¥"),
        _ => None,
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Compact duration: `1d 2h`, `3h 5m`, `4m 10s`, `12s`.
pub fn format_duration(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    let (days, hours, mins, secs) = (secs / 86_400, secs % 86_400 / 3600, secs % 3600 / 60, secs % 60);
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else if mins > 0 {
        format!("{mins}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use roomdesk_core::EntityId;

    use super::*;

    #[test]
    fn currency_formatting() {
        assert_eq!(format_currency(1234.5, "USD"), "$1,234.50");
        assert_eq!(format_currency(0.0, "USD"), "$0.00");
        assert_eq!(format_currency(-12.5, "EUR"), "-€12.50");
        assert_eq!(format_currency(1_000_000.0, "CHF"), "1,000,000.00 CHF");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(12_000), "12s");
        assert_eq!(format_duration(250_000), "4m 10s");
        assert_eq!(format_duration(3 * 3_600_000 + 5 * 60_000), "3h 5m");
        assert_eq!(format_duration(26 * 3_600_000), "1d 2h");
        assert_eq!(format_duration(-5), "0s");
    }

    #[test]
    fn recompute_replaces_all_derived_fields() {
        let mut entity = EntitySnapshot::new(EntityId::from("room1"));
        let _ = entity.live_fields.insert("player_count".into(), json!(3));
        let _ = entity.live_fields.insert("max_players".into(), json!(8));
        let _ = entity.live_fields.insert("pot".into(), json!(250));
        let _ = entity.live_fields.insert("started_at".into(), json!(1_000));
        entity.last_snapshot_at = Some(61_000);
        let _ = entity.derived.insert("stale".into(), json!(true));

        recompute(&mut entity, "USD");

        assert_eq!(entity.derived["occupancy_pct"], json!(37.5));
        assert_eq!(entity.derived["pot_formatted"], json!("$250.00"));
        assert_eq!(entity.derived["uptime"], json!("1m 0s"));
        assert!(entity.derived.get("stale").is_none());
    }

    #[test]
    fn zero_capacity_has_no_occupancy() {
        let mut entity = EntitySnapshot::new(EntityId::from("room1"));
        let _ = entity.live_fields.insert("player_count".into(), json!(0));
        let _ = entity.live_fields.insert("max_players".into(), json!(0));
        recompute(&mut entity, "USD");
        assert!(entity.derived.get("occupancy_pct").is_none());
    }
}
