use std::collections::HashMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only stored instant type.
pub type Ms = i64;

/// Minutes since midnight, club-local. Times of day are parsed once from
/// zero-padded `HH:MM` and compared as integers from then on.
pub type Minutes = i32;

/// Money in minor units (centavos).
pub type Cents = i64;

/// Strict `HH:MM` parse. Rejects anything that is not two zero-padded
/// digit pairs joined by a colon, or a time past `23:59`.
pub fn parse_hhmm(s: &str) -> Option<Minutes> {
    let bytes = s.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return None;
    }
    if !bytes[0].is_ascii_digit()
        || !bytes[1].is_ascii_digit()
        || !bytes[3].is_ascii_digit()
        || !bytes[4].is_ascii_digit()
    {
        return None;
    }
    let hours = (bytes[0] - b'0') as Minutes * 10 + (bytes[1] - b'0') as Minutes;
    let mins = (bytes[3] - b'0') as Minutes * 10 + (bytes[4] - b'0') as Minutes;
    if hours > 23 || mins > 59 {
        return None;
    }
    Some(hours * 60 + mins)
}

pub fn format_hhmm(minute: Minutes) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Half-open `[start, end)` time slot within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: Minutes,
    pub end: Minutes,
}

impl Slot {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Slot start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Minutes {
        self.end - self.start
    }

    /// Touching boundaries do not overlap.
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_minute(&self, m: Minutes) -> bool {
        self.start <= m && m < self.end
    }
}

/// Open/close minutes for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: Minutes,
    pub close: Minutes,
}

/// Per-club configuration read by the booking path. Weekday arrays are
/// indexed 0=Sunday; `None` means the club is closed that day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClubConfig {
    pub timezone: Tz,
    pub hours: [Option<DayHours>; 7],
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Court {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Terminal,
    Transfer,
    Stripe,
}

impl PaymentMethod {
    /// On-site methods settle at the club; only these skip the scheduled
    /// payment reminder.
    pub fn is_onsite(self) -> bool {
        !matches!(self, PaymentMethod::Stripe)
    }
}

/// Payment record created atomically with its booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub amount: Cents,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub club_id: Ulid,
    pub court_id: Ulid,
    pub date: NaiveDate,
    pub slot: Slot,
    pub price: Cents,
    pub currency: String,
    pub player_name: String,
    pub player_phone: String,
    pub player_email: Option<String>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub split_enabled: bool,
    pub split_count: u32,
    pub notes: Option<String>,
    pub created_at: Ms,
}

impl Booking {
    pub fn duration_min(&self) -> Minutes {
        self.slot.duration_min()
    }
}

/// Time-window price rule. `day_of_week` is 0=Sunday; `None` is the
/// default row that applies on days no day-specific rule covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: Ulid,
    pub day_of_week: Option<u8>,
    pub window: Slot,
    pub price_per_hour: Cents,
    pub created_at: Ms,
}

/// Type-specific eligibility conditions for a discount rule.
///
/// Externally tagged on purpose: bincode encodes the variant by index and
/// cannot decode tag/content representations, so the WAL demands the
/// default serde shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountConditions {
    /// Payer booked at least `min_bookings` times in the trailing window.
    Frequency {
        min_bookings: u32,
        time_window_days: u32,
    },
    /// Request falls on one of `days` (lowercase English names) with a
    /// start time inside `window`.
    HappyHour { days: Vec<String>, window: Slot },
    /// Booking lasts at least `min_hours` whole hours.
    Volume { min_hours: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountRule {
    pub id: Ulid,
    /// Percent off, 0–100.
    pub value: u8,
    pub conditions: DiscountConditions,
    pub enabled: bool,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ShareStatus {
    /// A share still collectable through the payment link flow.
    pub fn is_open(self) -> bool {
        matches!(self, ShareStatus::Pending | ShareStatus::Processing)
    }
}

/// One payer's share of a split booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPayment {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub payer_name: String,
    pub payer_phone: String,
    pub payer_email: String,
    pub amount: Cents,
    pub status: ShareStatus,
    pub completed_at: Option<Ms>,
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    Confirmation,
    Reminder24h,
    Reminder2h,
    PaymentReminder,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    /// In-memory claim between selection and dispatch; never persisted,
    /// so claimed jobs revert to pending on replay.
    Processing,
    Sent,
    Failed,
    Delivered,
}

/// Typed scheduling record. `scheduled_for` and `job_type` are first-class
/// fields, not metadata stuffed into a message blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub job_type: JobType,
    pub scheduled_for: Ms,
    pub status: JobStatus,
    pub message: String,
    pub link: Option<String>,
    pub error: Option<String>,
    pub sent_at: Option<Ms>,
}

/// Per-payer aggregates, updated best-effort after each booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerStats {
    pub total_bookings: u64,
    pub total_spent: Cents,
    pub last_booking_at: Option<Ms>,
}

/// The event types — flat, no nesting. This is the WAL record format.
/// `BookingCreated` is a single record on purpose: booking, payment and
/// split shares commit or are lost together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ClubCreated {
        id: Ulid,
        timezone: Tz,
        hours: [Option<DayHours>; 7],
        currency: String,
    },
    ClubHoursUpdated {
        id: Ulid,
        hours: [Option<DayHours>; 7],
    },
    CourtAdded {
        id: Ulid,
        club_id: Ulid,
        name: String,
    },
    PricingRuleAdded {
        club_id: Ulid,
        rule: PricingRule,
    },
    PricingRuleRemoved {
        id: Ulid,
        club_id: Ulid,
    },
    DiscountRuleAdded {
        club_id: Ulid,
        rule: DiscountRule,
    },
    DiscountRuleRemoved {
        id: Ulid,
        club_id: Ulid,
    },
    BookingCreated {
        club_id: Ulid,
        booking: Booking,
        payment: Payment,
        shares: Vec<SplitPayment>,
    },
    BookingStatusChanged {
        id: Ulid,
        club_id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
    /// Application cascades: still-pending jobs fail with "cancelled",
    /// still-open shares move to cancelled. One record, one atomic flip.
    BookingCancelled {
        id: Ulid,
        club_id: Ulid,
        at: Ms,
    },
    SharesGenerated {
        club_id: Ulid,
        booking_id: Ulid,
        shares: Vec<SplitPayment>,
    },
    ShareCompleted {
        id: Ulid,
        club_id: Ulid,
        method: PaymentMethod,
        reference: Option<String>,
        at: Ms,
    },
    JobsScheduled {
        club_id: Ulid,
        jobs: Vec<NotificationJob>,
    },
    JobSent {
        id: Ulid,
        club_id: Ulid,
        at: Ms,
        link: Option<String>,
    },
    JobFailed {
        id: Ulid,
        club_id: Ulid,
        error: String,
    },
    JobDelivered {
        id: Ulid,
        club_id: Ulid,
        at: Ms,
    },
    /// Full snapshot, not an increment — replay and compaction apply it
    /// the same way.
    StatsRecorded {
        club_id: Ulid,
        phone: String,
        stats: PlayerStats,
    },
}

// ── In-memory club state ─────────────────────────────────────────

/// Everything one club owns, guarded by a single RwLock in the engine.
/// Holding the write lock across conflict-check + insert is what makes
/// booking creation race-free.
#[derive(Debug, Clone)]
pub struct ClubState {
    pub id: Ulid,
    pub config: ClubConfig,
    pub courts: Vec<Court>,
    /// Creation order — the documented discount tie-break depends on it.
    pub pricing_rules: Vec<PricingRule>,
    pub discount_rules: Vec<DiscountRule>,
    pub bookings: HashMap<Ulid, Booking>,
    /// (court, date) → booking ids. The range-query index behind conflict
    /// checks and day listings.
    pub slots: HashMap<(Ulid, NaiveDate), Vec<Ulid>>,
    /// Payment records per booking, in creation order.
    pub payments: HashMap<Ulid, Vec<Payment>>,
    pub shares: HashMap<Ulid, SplitPayment>,
    pub shares_by_booking: HashMap<Ulid, Vec<Ulid>>,
    pub jobs: HashMap<Ulid, NotificationJob>,
    pub jobs_by_booking: HashMap<Ulid, Vec<Ulid>>,
    pub stats: HashMap<String, PlayerStats>,
}

impl ClubState {
    pub fn new(id: Ulid, config: ClubConfig) -> Self {
        Self {
            id,
            config,
            courts: Vec::new(),
            pricing_rules: Vec::new(),
            discount_rules: Vec::new(),
            bookings: HashMap::new(),
            slots: HashMap::new(),
            payments: HashMap::new(),
            shares: HashMap::new(),
            shares_by_booking: HashMap::new(),
            jobs: HashMap::new(),
            jobs_by_booking: HashMap::new(),
            stats: HashMap::new(),
        }
    }

    pub fn court(&self, id: Ulid) -> Option<&Court> {
        self.courts.iter().find(|c| c.id == id)
    }

    /// Insert a booking and index it under its (court, date) slot key.
    pub fn insert_booking(&mut self, booking: Booking) {
        self.slots
            .entry((booking.court_id, booking.date))
            .or_default()
            .push(booking.id);
        self.bookings.insert(booking.id, booking);
    }

    /// Bookings on a court/date, cancelled included — callers filter.
    pub fn bookings_on(&self, court_id: Ulid, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.slots
            .get(&(court_id, date))
            .into_iter()
            .flatten()
            .filter_map(|id| self.bookings.get(id))
    }

    pub fn insert_share(&mut self, share: SplitPayment) {
        self.shares_by_booking
            .entry(share.booking_id)
            .or_default()
            .push(share.id);
        self.shares.insert(share.id, share);
    }

    pub fn insert_job(&mut self, job: NotificationJob) {
        self.jobs_by_booking
            .entry(job.booking_id)
            .or_default()
            .push(job.id);
        self.jobs.insert(job.id, job);
    }

    /// Shares of a booking in generation order.
    pub fn shares_of(&self, booking_id: Ulid) -> Vec<&SplitPayment> {
        self.shares_by_booking
            .get(&booking_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.shares.get(id))
            .collect()
    }

    pub fn jobs_of(&self, booking_id: Ulid) -> Vec<&NotificationJob> {
        self.jobs_by_booking
            .get(&booking_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.jobs.get(id))
            .collect()
    }
}

// ── Query result types ───────────────────────────────────────────

/// Derived split-payment aggregates — recomputed on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub share_count: u32,
    pub completed_payments: u32,
    pub pending_amount: Cents,
    pub completed_amount: Cents,
    pub is_payment_complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub sent: usize,
    pub failed: usize,
    pub delivered: usize,
}

/// Outcome of one notification sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub sent: usize,
    pub failed: usize,
}

/// Booking creation input, as received from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub club_id: Ulid,
    pub court_id: Ulid,
    pub date: NaiveDate,
    pub start_time: String,
    pub duration_min: Minutes,
    pub player_name: String,
    pub player_phone: String,
    #[serde(default)]
    pub player_email: Option<String>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub split_enabled: bool,
    #[serde(default)]
    pub split_count: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hhmm_strict() {
        assert_eq!(parse_hhmm("00:00"), Some(0));
        assert_eq!(parse_hhmm("09:30"), Some(570));
        assert_eq!(parse_hhmm("23:59"), Some(23 * 60 + 59));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("9:30"), None); // not zero-padded
        assert_eq!(parse_hhmm("09-30"), None);
        assert_eq!(parse_hhmm("09:60"), None);
        assert_eq!(parse_hhmm(""), None);
    }

    #[test]
    fn format_hhmm_pads() {
        assert_eq!(format_hhmm(570), "09:30");
        assert_eq!(format_hhmm(0), "00:00");
        assert_eq!(format_hhmm(19 * 60 + 30), "19:30");
    }

    #[test]
    fn slot_overlap_half_open() {
        let a = Slot::new(600, 660); // 10:00–11:00
        let b = Slot::new(630, 690); // 10:30–11:30
        let c = Slot::new(660, 720); // 11:00–12:00
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn slot_contains_minute_excludes_end() {
        let s = Slot::new(600, 660);
        assert!(s.contains_minute(600));
        assert!(s.contains_minute(659));
        assert!(!s.contains_minute(660));
    }

    #[test]
    fn slots_index_groups_by_court_and_date() {
        let club_id = Ulid::new();
        let config = ClubConfig {
            timezone: chrono_tz::UTC,
            hours: [Some(DayHours { open: 0, close: 1440 }); 7],
            currency: "MXN".into(),
        };
        let mut state = ClubState::new(club_id, config);
        let court = Ulid::new();
        let date = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();

        for start in [600, 660, 720] {
            state.insert_booking(Booking {
                id: Ulid::new(),
                club_id,
                court_id: court,
                date,
                slot: Slot::new(start, start + 60),
                price: 500,
                currency: "MXN".into(),
                player_name: "Ana".into(),
                player_phone: "5511122233".into(),
                player_email: None,
                status: BookingStatus::Pending,
                payment_status: PaymentStatus::Pending,
                payment_method: PaymentMethod::Cash,
                split_enabled: false,
                split_count: 0,
                notes: None,
                created_at: 0,
            });
        }

        assert_eq!(state.bookings_on(court, date).count(), 3);
        let other_date = NaiveDate::from_ymd_opt(2026, 9, 2).unwrap();
        assert_eq!(state.bookings_on(court, other_date).count(), 0);
        assert_eq!(state.bookings_on(Ulid::new(), date).count(), 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ClubCreated {
            id: Ulid::new(),
            timezone: chrono_tz::America::Mexico_City,
            hours: [Some(DayHours { open: 420, close: 1380 }); 7],
            currency: "MXN".into(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn discount_rule_event_roundtrip() {
        // Conditions stay externally tagged so bincode can round-trip them.
        let event = Event::DiscountRuleAdded {
            club_id: Ulid::new(),
            rule: DiscountRule {
                id: Ulid::new(),
                value: 15,
                conditions: DiscountConditions::HappyHour {
                    days: vec!["monday".into(), "tuesday".into()],
                    window: Slot::new(840, 1020),
                },
                enabled: true,
                created_at: 42,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn booking_event_roundtrip_carries_shares() {
        let club_id = Ulid::new();
        let booking_id = Ulid::new();
        let event = Event::BookingCreated {
            club_id,
            booking: Booking {
                id: booking_id,
                club_id,
                court_id: Ulid::new(),
                date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
                slot: Slot::new(600, 690),
                price: 750,
                currency: "MXN".into(),
                player_name: "Luis".into(),
                player_phone: "5599988877".into(),
                player_email: Some("luis@example.com".into()),
                status: BookingStatus::Pending,
                payment_status: PaymentStatus::Pending,
                payment_method: PaymentMethod::Stripe,
                split_enabled: true,
                split_count: 2,
                notes: None,
                created_at: 1_000,
            },
            payment: Payment {
                id: Ulid::new(),
                booking_id,
                amount: 750,
                method: PaymentMethod::Stripe,
                status: PaymentStatus::Pending,
            },
            shares: vec![SplitPayment {
                id: Ulid::new(),
                booking_id,
                payer_name: "Luis".into(),
                payer_phone: "5599988877".into(),
                payer_email: "luis@example.com".into(),
                amount: 375,
                status: ShareStatus::Pending,
                completed_at: None,
                method: None,
                reference: None,
            }],
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
