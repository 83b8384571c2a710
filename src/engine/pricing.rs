use chrono::NaiveDate;

use crate::clock::{weekday_index, weekday_name};
use crate::model::*;

use super::error::EngineError;

/// Price for `minutes` at an hourly rate, rounded half-up to the cent.
fn round_hourly(per_hour: Cents, minutes: Minutes) -> Cents {
    (per_hour * minutes as i64 + 30) / 60
}

/// `percent` of `amount`, rounded half-up.
fn round_percent(amount: Cents, percent: u8) -> Cents {
    (amount * percent as i64 + 50) / 100
}

/// Pick the pricing rule covering `start` on the given weekday.
///
/// Precedence: a day-specific rule beats the default (no weekday), then
/// the most recently created wins, then the latest added. The rule's
/// window is matched against the booking *start* only; a booking may run
/// past the window's end at the window's rate.
pub fn resolve_rule(state: &ClubState, weekday: u8, start: Minutes) -> Option<&PricingRule> {
    state
        .pricing_rules
        .iter()
        .enumerate()
        .filter(|(_, r)| r.window.contains_minute(start))
        .filter(|(_, r)| match r.day_of_week {
            Some(day) => day == weekday,
            None => true,
        })
        .max_by_key(|(i, r)| (r.day_of_week.is_some(), r.created_at, *i))
        .map(|(_, r)| r)
}

fn is_eligible(
    rule: &DiscountRule,
    state: &ClubState,
    weekday: u8,
    start: Minutes,
    duration_min: Minutes,
    payer_phone: Option<&str>,
    now: Ms,
) -> bool {
    match &rule.conditions {
        DiscountConditions::Volume { min_hours } => duration_min >= (*min_hours as i32) * 60,
        DiscountConditions::HappyHour { days, window } => {
            days.iter().any(|d| d == weekday_name(weekday)) && window.contains_minute(start)
        }
        DiscountConditions::Frequency {
            min_bookings,
            time_window_days,
        } => {
            let Some(phone) = payer_phone else {
                return false;
            };
            let cutoff = now - (*time_window_days as i64) * 86_400_000;
            let count = state
                .bookings
                .values()
                .filter(|b| b.player_phone == phone)
                .filter(|b| {
                    matches!(
                        b.status,
                        BookingStatus::Confirmed | BookingStatus::Completed
                    )
                })
                .filter(|b| b.created_at >= cutoff)
                .count();
            count >= *min_bookings as usize
        }
    }
}

/// The single discount that applies, if any. Rules are considered in a
/// total order (highest value, then oldest created, then first added) and
/// exactly the first eligible one wins. Disabled rules never apply, and
/// without a payer identity no rule does: anonymous price checks always
/// quote the undiscounted rate.
pub fn first_eligible_discount<'a>(
    state: &'a ClubState,
    date: NaiveDate,
    start: Minutes,
    duration_min: Minutes,
    payer_phone: Option<&str>,
    now: Ms,
) -> Option<&'a DiscountRule> {
    payer_phone?;
    let weekday = weekday_index(date);
    let mut candidates: Vec<(usize, &DiscountRule)> = state
        .discount_rules
        .iter()
        .enumerate()
        .filter(|(_, r)| r.enabled)
        .collect();
    candidates.sort_by_key(|(i, r)| (std::cmp::Reverse(r.value), r.created_at, *i));
    candidates
        .into_iter()
        .map(|(_, r)| r)
        .find(|r| is_eligible(r, state, weekday, start, duration_min, payer_phone, now))
}

/// Full deterministic quote: resolve the hourly rule, scale to duration,
/// apply at most one discount. Errors if no rule covers the start or the
/// rule's rate is zero.
pub fn quote(
    state: &ClubState,
    date: NaiveDate,
    start: Minutes,
    duration_min: Minutes,
    payer_phone: Option<&str>,
    now: Ms,
) -> Result<Cents, EngineError> {
    let weekday = weekday_index(date);
    let rule = resolve_rule(state, weekday, start).ok_or(EngineError::PricingUnconfigured {
        day_of_week: weekday,
        start,
    })?;
    if rule.price_per_hour == 0 {
        return Err(EngineError::PricingInvalidZero);
    }
    let mut price = round_hourly(rule.price_per_hour, duration_min);
    if let Some(discount) = first_eligible_discount(state, date, start, duration_min, payer_phone, now)
    {
        price -= round_percent(price, discount.value);
    }
    Ok(price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;
    use ulid::Ulid;

    fn empty_club() -> ClubState {
        let config = ClubConfig {
            timezone: Tz::UTC,
            hours: [Some(DayHours {
                open: parse_hhmm("07:00").unwrap(),
                close: parse_hhmm("22:00").unwrap(),
            }); 7],
            currency: "MXN".into(),
        };
        ClubState::new(Ulid::new(), config)
    }

    fn rule(day: Option<u8>, start: &str, end: &str, per_hour: Cents, created_at: Ms) -> PricingRule {
        PricingRule {
            id: Ulid::new(),
            day_of_week: day,
            window: Slot::new(parse_hhmm(start).unwrap(), parse_hhmm(end).unwrap()),
            price_per_hour: per_hour,
            created_at,
        }
    }

    fn discount(value: u8, conditions: DiscountConditions, created_at: Ms) -> DiscountRule {
        DiscountRule {
            id: Ulid::new(),
            value,
            conditions,
            enabled: true,
            created_at,
        }
    }

    // 2026-09-01 is a Tuesday (weekday index 2).
    fn tuesday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()
    }

    #[test]
    fn hourly_rate_scales_exactly() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "22:00", 50_000, 1));
        let start = parse_hhmm("10:00").unwrap();
        assert_eq!(quote(&state, tuesday(), start, 60, None, 0).unwrap(), 50_000);
        assert_eq!(quote(&state, tuesday(), start, 90, None, 0).unwrap(), 75_000);
        assert_eq!(quote(&state, tuesday(), start, 30, None, 0).unwrap(), 25_000);
    }

    #[test]
    fn rounding_is_half_up() {
        // 333 per hour for 50 min = 277.5, rounds to 278.
        assert_eq!(round_hourly(333, 50), 278);
        // 7% of 107 = 7.49, rounds to 7.
        assert_eq!(round_percent(107, 7), 7);
        // 50% of 101 = 50.5, rounds to 51.
        assert_eq!(round_percent(101, 50), 51);
    }

    #[test]
    fn day_specific_rule_beats_default() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "22:00", 40_000, 5));
        state.pricing_rules.push(rule(Some(2), "07:00", "22:00", 60_000, 1));
        let start = parse_hhmm("10:00").unwrap();
        // Day-specific wins even though the default is newer.
        assert_eq!(quote(&state, tuesday(), start, 60, None, 0).unwrap(), 60_000);
        // A Wednesday falls back to the default.
        let wednesday = NaiveDate::from_ymd_opt(2026, 9, 2).unwrap();
        assert_eq!(quote(&state, wednesday, start, 60, None, 0).unwrap(), 40_000);
    }

    #[test]
    fn newest_rule_wins_within_tier() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "22:00", 40_000, 1));
        state.pricing_rules.push(rule(None, "07:00", "22:00", 45_000, 9));
        let start = parse_hhmm("10:00").unwrap();
        assert_eq!(
            quote(&state, tuesday(), start, 60, Some("5211234567"), 0).unwrap(),
            45_000
        );
    }

    #[test]
    fn window_matches_start_only() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "18:00", 40_000, 1));
        // Starts at 17:30, runs past 18:00 — still the 40_000 rate.
        let start = parse_hhmm("17:30").unwrap();
        assert_eq!(quote(&state, tuesday(), start, 90, None, 0).unwrap(), 60_000);
        // Starting exactly at the window end is uncovered.
        let at_end = parse_hhmm("18:00").unwrap();
        assert!(matches!(
            quote(&state, tuesday(), at_end, 60, None, 0),
            Err(EngineError::PricingUnconfigured { .. })
        ));
    }

    #[test]
    fn zero_rate_is_rejected() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "22:00", 0, 1));
        let start = parse_hhmm("10:00").unwrap();
        assert!(matches!(
            quote(&state, tuesday(), start, 60, None, 0),
            Err(EngineError::PricingInvalidZero)
        ));
    }

    #[test]
    fn no_rule_is_rejected() {
        let state = empty_club();
        let start = parse_hhmm("10:00").unwrap();
        assert!(matches!(
            quote(&state, tuesday(), start, 60, None, 0),
            Err(EngineError::PricingUnconfigured { .. })
        ));
    }

    #[test]
    fn volume_discount_applies_once() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "22:00", 50_000, 1));
        state.discount_rules.push(discount(
            10,
            DiscountConditions::Volume { min_hours: 2 },
            1,
        ));
        let start = parse_hhmm("10:00").unwrap();
        let payer = Some("5211234567");
        // 90 min is under two hours, no discount.
        assert_eq!(quote(&state, tuesday(), start, 90, payer, 0).unwrap(), 75_000);
        // 120 min qualifies: 100_000 - 10% = 90_000.
        assert_eq!(quote(&state, tuesday(), start, 120, payer, 0).unwrap(), 90_000);
    }

    #[test]
    fn highest_value_discount_wins() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "22:00", 50_000, 1));
        state.discount_rules.push(discount(
            5,
            DiscountConditions::Volume { min_hours: 1 },
            1,
        ));
        state.discount_rules.push(discount(
            20,
            DiscountConditions::Volume { min_hours: 1 },
            9,
        ));
        let start = parse_hhmm("10:00").unwrap();
        // Only the 20% rule applies, never both.
        assert_eq!(
            quote(&state, tuesday(), start, 60, Some("5211234567"), 0).unwrap(),
            40_000
        );
    }

    #[test]
    fn ineligible_high_value_discount_falls_through() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "22:00", 50_000, 1));
        state.discount_rules.push(discount(
            30,
            DiscountConditions::Volume { min_hours: 4 },
            1,
        ));
        state.discount_rules.push(discount(
            10,
            DiscountConditions::Volume { min_hours: 1 },
            2,
        ));
        let start = parse_hhmm("10:00").unwrap();
        assert_eq!(
            quote(&state, tuesday(), start, 60, Some("5211234567"), 0).unwrap(),
            45_000
        );
    }

    #[test]
    fn disabled_discount_is_skipped() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "22:00", 50_000, 1));
        let mut d = discount(10, DiscountConditions::Volume { min_hours: 1 }, 1);
        d.enabled = false;
        state.discount_rules.push(d);
        let start = parse_hhmm("10:00").unwrap();
        assert_eq!(
            quote(&state, tuesday(), start, 60, Some("5211234567"), 0).unwrap(),
            50_000
        );
    }

    #[test]
    fn anonymous_quote_is_never_discounted() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "22:00", 50_000, 1));
        state.discount_rules.push(discount(
            15,
            DiscountConditions::Volume { min_hours: 1 },
            1,
        ));
        let start = parse_hhmm("10:00").unwrap();
        assert_eq!(quote(&state, tuesday(), start, 60, None, 0).unwrap(), 50_000);
        assert_eq!(
            quote(&state, tuesday(), start, 60, Some("5211234567"), 0).unwrap(),
            42_500
        );
    }

    #[test]
    fn happy_hour_matches_day_and_window() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "22:00", 50_000, 1));
        state.discount_rules.push(discount(
            15,
            DiscountConditions::HappyHour {
                days: vec!["tuesday".into(), "wednesday".into()],
                window: Slot::new(parse_hhmm("14:00").unwrap(), parse_hhmm("17:00").unwrap()),
            },
            1,
        ));
        let inside = parse_hhmm("15:00").unwrap();
        let outside = parse_hhmm("18:00").unwrap();
        let payer = Some("5211234567");
        assert_eq!(quote(&state, tuesday(), inside, 60, payer, 0).unwrap(), 42_500);
        assert_eq!(quote(&state, tuesday(), outside, 60, payer, 0).unwrap(), 50_000);
        let thursday = NaiveDate::from_ymd_opt(2026, 9, 3).unwrap();
        assert_eq!(quote(&state, thursday, inside, 60, payer, 0).unwrap(), 50_000);
    }

    #[test]
    fn frequency_discount_counts_recent_settled_bookings() {
        let mut state = empty_club();
        state.pricing_rules.push(rule(None, "07:00", "22:00", 50_000, 1));
        state.discount_rules.push(discount(
            10,
            DiscountConditions::Frequency {
                min_bookings: 2,
                time_window_days: 30,
            },
            1,
        ));
        let now: Ms = 100 * 86_400_000;
        let court_id = Ulid::new();
        let mut push = |status: BookingStatus, created_at: Ms| {
            state.insert_booking(Booking {
                id: Ulid::new(),
                club_id: state.id,
                court_id,
                date: tuesday(),
                slot: Slot::new(parse_hhmm("08:00").unwrap(), parse_hhmm("09:00").unwrap()),
                price: 50_000,
                currency: "MXN".into(),
                player_name: "Ana".into(),
                player_phone: "5211234567".into(),
                player_email: None,
                status,
                payment_status: PaymentStatus::Completed,
                payment_method: PaymentMethod::Cash,
                split_enabled: false,
                split_count: 0,
                notes: None,
                created_at,
            });
        };
        push(BookingStatus::Confirmed, now - 86_400_000);
        push(BookingStatus::Completed, now - 2 * 86_400_000);
        push(BookingStatus::Pending, now - 86_400_000); // not settled
        push(BookingStatus::Confirmed, now - 40 * 86_400_000); // too old

        let start = parse_hhmm("10:00").unwrap();
        // Two qualifying bookings meet the threshold.
        assert_eq!(
            quote(&state, tuesday(), start, 60, Some("5211234567"), now).unwrap(),
            45_000
        );
        // Other phone, anonymous payer: no discount.
        assert_eq!(
            quote(&state, tuesday(), start, 60, Some("5219999999"), now).unwrap(),
            50_000
        );
        assert_eq!(quote(&state, tuesday(), start, 60, None, now).unwrap(), 50_000);
    }
}
