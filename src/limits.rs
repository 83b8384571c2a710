//! Hard limits. Every unbounded input path checks one of these before
//! allocating or looping.

/// Max clubs a single tenant may create.
pub const MAX_CLUBS_PER_TENANT: usize = 1_000;

/// Max courts per club.
pub const MAX_COURTS_PER_CLUB: usize = 200;

/// Max pricing + discount rules per club.
pub const MAX_RULES_PER_CLUB: usize = 500;

/// Max non-cancelled bookings per club held in memory.
pub const MAX_BOOKINGS_PER_CLUB: usize = 500_000;

/// Booking duration bounds, in minutes.
pub const MIN_BOOKING_MINUTES: i32 = 30;
pub const MAX_BOOKING_MINUTES: i32 = 240;

/// Bookings may be created at most this many days ahead (club-local).
pub const MAX_ADVANCE_DAYS: i64 = 90;

/// Split-payment share count bounds.
pub const MIN_SPLIT_COUNT: u32 = 2;
pub const MAX_SPLIT_COUNT: u32 = 50;

/// Minimum digits in a payer phone number.
pub const MIN_PHONE_LEN: usize = 10;

/// Max length of free-text fields (names, notes, references).
pub const MAX_NAME_LEN: usize = 256;

/// Max notification jobs fetched per sweep pass.
pub const MAX_SWEEP_BATCH: usize = 500;

/// Tenant limits (mirrors the per-tenant WAL layout).
pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 256;
