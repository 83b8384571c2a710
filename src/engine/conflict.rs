use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Booking, BookingStatus, ClubState, Slot};

/// Active bookings on the same court and date whose interval overlaps the
/// requested slot. Cancelled bookings never block; adjacency (one slot
/// ending exactly where another starts) is not a conflict.
pub fn find_conflicts(
    state: &ClubState,
    court_id: Ulid,
    date: NaiveDate,
    slot: Slot,
) -> Vec<Booking> {
    state
        .bookings_on(court_id, date)
        .filter(|b| b.status != BookingStatus::Cancelled)
        .filter(|b| b.slot.overlaps(&slot))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono_tz::Tz;

    fn club_with_booking(start: &str, end: &str, status: BookingStatus) -> (ClubState, Ulid) {
        let club_id = Ulid::new();
        let court_id = Ulid::new();
        let config = ClubConfig {
            timezone: Tz::UTC,
            hours: [Some(DayHours {
                open: parse_hhmm("07:00").unwrap(),
                close: parse_hhmm("22:00").unwrap(),
            }); 7],
            currency: "MXN".into(),
        };
        let mut state = ClubState::new(club_id, config);
        state.courts.push(Court {
            id: court_id,
            name: "Court 1".into(),
        });
        let slot = Slot::new(parse_hhmm(start).unwrap(), parse_hhmm(end).unwrap());
        state.insert_booking(Booking {
            id: Ulid::new(),
            club_id,
            court_id,
            date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            slot,
            price: 50_000,
            currency: "MXN".into(),
            player_name: "Ana".into(),
            player_phone: "5211234567".into(),
            player_email: None,
            status,
            payment_status: PaymentStatus::Pending,
            payment_method: PaymentMethod::Cash,
            split_enabled: false,
            split_count: 0,
            notes: None,
            created_at: 0,
        });
        (state, court_id)
    }

    fn slot(start: &str, end: &str) -> Slot {
        Slot::new(parse_hhmm(start).unwrap(), parse_hhmm(end).unwrap())
    }

    #[test]
    fn overlapping_booking_conflicts() {
        let (state, court) = club_with_booking("10:00", "11:00", BookingStatus::Confirmed);
        let date = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        assert_eq!(find_conflicts(&state, court, date, slot("10:30", "11:30")).len(), 1);
    }

    #[test]
    fn adjacent_booking_does_not_conflict() {
        let (state, court) = club_with_booking("10:00", "11:00", BookingStatus::Confirmed);
        let date = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        assert!(find_conflicts(&state, court, date, slot("11:00", "12:00")).is_empty());
        assert!(find_conflicts(&state, court, date, slot("09:00", "10:00")).is_empty());
    }

    #[test]
    fn cancelled_booking_does_not_conflict() {
        let (state, court) = club_with_booking("10:00", "11:00", BookingStatus::Cancelled);
        let date = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        assert!(find_conflicts(&state, court, date, slot("10:00", "11:00")).is_empty());
    }

    #[test]
    fn other_date_does_not_conflict() {
        let (state, court) = club_with_booking("10:00", "11:00", BookingStatus::Confirmed);
        let other = NaiveDate::from_ymd_opt(2026, 9, 2).unwrap();
        assert!(find_conflicts(&state, court, other, slot("10:00", "11:00")).is_empty());
    }
}
