//! Price ratchet check: a subscription's price should never drop below the
//! highest price it has been billed at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub effective_at: DateTime<Utc>,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionPrices {
    pub subscription_id: String,
    pub company_id: String,
    pub history: Vec<PricePoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RatchetAnomaly {
    pub subscription_id: String,
    pub company_id: String,
    pub current_price_cents: i64,
    pub peak_price_cents: i64,
    pub peak_at: DateTime<Utc>,
    pub drop_cents: i64,
}

/// `None` when the latest price is at the historical peak (or there is no history).
pub fn check_ratchet(sub: &SubscriptionPrices) -> Option<RatchetAnomaly> {
    let current = sub.history.iter().max_by_key(|p| p.effective_at)?;

    // earliest point at the peak price
    let peak = sub
        .history
        .iter()
        .max_by(|a, b| {
            a.price_cents
                .cmp(&b.price_cents)
                .then(b.effective_at.cmp(&a.effective_at))
        })?;

    if current.price_cents >= peak.price_cents {
        return None;
    }

    Some(RatchetAnomaly {
        subscription_id: sub.subscription_id.clone(),
        company_id: sub.company_id.clone(),
        current_price_cents: current.price_cents,
        peak_price_cents: peak.price_cents,
        peak_at: peak.effective_at,
        drop_cents: peak.price_cents - current.price_cents,
    })
}

pub fn find_anomalies(subs: &[SubscriptionPrices]) -> Vec<RatchetAnomaly> {
    subs.iter().filter_map(check_ratchet).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sub(prices: &[i64]) -> SubscriptionPrices {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        SubscriptionPrices {
            subscription_id: "S1".into(),
            company_id: "C1".into(),
            history: prices
                .iter()
                .enumerate()
                .map(|(i, p)| PricePoint {
                    effective_at: t0 + Duration::days(30 * i as i64),
                    price_cents: *p,
                })
                .collect(),
        }
    }

    #[test]
    fn rising_prices_are_fine() {
        assert_eq!(check_ratchet(&sub(&[1000, 1200, 1200])), None);
        assert_eq!(check_ratchet(&sub(&[])), None);
    }

    #[test]
    fn drop_below_peak_is_flagged() {
        let a = check_ratchet(&sub(&[1000, 1500, 1500, 1100])).unwrap();
        assert_eq!(a.peak_price_cents, 1500);
        assert_eq!(a.current_price_cents, 1100);
        assert_eq!(a.drop_cents, 400);
        // first time the peak was reached
        assert_eq!(a.peak_at, sub(&[0, 0]).history[1].effective_at);
    }
}
