//! Read-only operations. Everything here takes the club read lock and
//! derives its answer from current state; nothing is cached.

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, conflict, pricing};

impl Engine {
    pub fn list_clubs(&self) -> Vec<Ulid> {
        self.clubs.iter().map(|e| *e.key()).collect()
    }

    pub async fn list_courts(&self, club_id: Ulid) -> Result<Vec<Court>, EngineError> {
        let state = self.club_or_err(&club_id)?;
        let guard = state.read().await;
        Ok(guard.courts.clone())
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let club_id = self
            .club_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let state = self.club_or_err(&club_id)?;
        let guard = state.read().await;
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Bookings on one date, sorted by court then start time. Cancelled
    /// entries are hidden unless asked for.
    pub async fn list_bookings(
        &self,
        club_id: Ulid,
        date: NaiveDate,
        court_id: Option<Ulid>,
        include_cancelled: bool,
    ) -> Result<Vec<Booking>, EngineError> {
        let state = self.club_or_err(&club_id)?;
        let guard = state.read().await;
        let courts: Vec<Ulid> = match court_id {
            Some(id) => {
                guard.court(id).ok_or(EngineError::NotFound(id))?;
                vec![id]
            }
            None => guard.courts.iter().map(|c| c.id).collect(),
        };
        let mut out: Vec<Booking> = Vec::new();
        for court in courts {
            out.extend(
                guard
                    .bookings_on(court, date)
                    .filter(|b| include_cancelled || b.status != BookingStatus::Cancelled)
                    .cloned(),
            );
        }
        out.sort_by_key(|b| (b.court_id, b.slot.start, b.id));
        Ok(out)
    }

    /// Conflict probe without booking anything.
    pub async fn check_conflicts(
        &self,
        club_id: Ulid,
        court_id: Ulid,
        date: NaiveDate,
        start_time: &str,
        duration_min: Minutes,
    ) -> Result<Vec<Booking>, EngineError> {
        let start = parse_hhmm(start_time)
            .ok_or(EngineError::Validation("start time must be HH:MM"))?;
        if duration_min <= 0 {
            return Err(EngineError::Validation("duration must be positive"));
        }
        let state = self.club_or_err(&club_id)?;
        let guard = state.read().await;
        guard
            .court(court_id)
            .ok_or(EngineError::NotFound(court_id))?;
        let slot = Slot::new(start, start + duration_min);
        Ok(conflict::find_conflicts(&guard, court_id, date, slot))
    }

    /// Quote without booking. Same rule resolution, same rounding, same
    /// discount order as the write path.
    pub async fn calculate_price(
        &self,
        club_id: Ulid,
        date: NaiveDate,
        start_time: &str,
        duration_min: Minutes,
        payer_phone: Option<&str>,
    ) -> Result<Cents, EngineError> {
        let start = parse_hhmm(start_time)
            .ok_or(EngineError::Validation("start time must be HH:MM"))?;
        if duration_min <= 0 {
            return Err(EngineError::Validation("duration must be positive"));
        }
        let state = self.club_or_err(&club_id)?;
        let guard = state.read().await;
        pricing::quote(
            &guard,
            date,
            start,
            duration_min,
            payer_phone,
            self.clock.now_ms(),
        )
    }

    pub async fn list_split_payments(
        &self,
        booking_id: Ulid,
    ) -> Result<Vec<SplitPayment>, EngineError> {
        let club_id = self
            .club_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let state = self.club_or_err(&club_id)?;
        let guard = state.read().await;
        if !guard.bookings.contains_key(&booking_id) {
            return Err(EngineError::NotFound(booking_id));
        }
        Ok(guard.shares_of(booking_id).into_iter().cloned().collect())
    }

    /// Split-ledger rollup for one booking. For unsplit bookings the
    /// summary degenerates to the booking's own payment state.
    pub async fn payment_summary(&self, booking_id: Ulid) -> Result<PaymentSummary, EngineError> {
        let club_id = self
            .club_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let state = self.club_or_err(&club_id)?;
        let guard = state.read().await;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let shares = guard.shares_of(booking_id);
        if shares.is_empty() {
            // An on-site booking that got checked in counts as paid even
            // if no payment record was settled explicitly.
            let paid = booking.payment_status == PaymentStatus::Completed
                || matches!(
                    booking.status,
                    BookingStatus::InProgress | BookingStatus::Completed
                );
            return Ok(PaymentSummary {
                share_count: 0,
                completed_payments: 0,
                pending_amount: if paid { 0 } else { booking.price },
                completed_amount: if paid { booking.price } else { 0 },
                is_payment_complete: paid,
            });
        }
        let mut summary = PaymentSummary {
            share_count: shares.len() as u32,
            completed_payments: 0,
            pending_amount: 0,
            completed_amount: 0,
            is_payment_complete: false,
        };
        for share in &shares {
            match share.status {
                ShareStatus::Completed => {
                    summary.completed_payments += 1;
                    summary.completed_amount += share.amount;
                }
                ShareStatus::Pending | ShareStatus::Processing => {
                    summary.pending_amount += share.amount;
                }
                ShareStatus::Failed | ShareStatus::Cancelled => {}
            }
        }
        summary.is_payment_complete = summary.completed_payments == summary.share_count;
        Ok(summary)
    }

    pub async fn list_notifications(
        &self,
        booking_id: Ulid,
    ) -> Result<Vec<NotificationJob>, EngineError> {
        let club_id = self
            .club_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let state = self.club_or_err(&club_id)?;
        let guard = state.read().await;
        if !guard.bookings.contains_key(&booking_id) {
            return Err(EngineError::NotFound(booking_id));
        }
        let mut jobs: Vec<NotificationJob> =
            guard.jobs_of(booking_id).into_iter().cloned().collect();
        jobs.sort_by_key(|j| (j.scheduled_for, j.id));
        Ok(jobs)
    }

    /// Job counts by status across one club's queue.
    pub async fn queue_stats(&self, club_id: Ulid) -> Result<QueueStats, EngineError> {
        let state = self.club_or_err(&club_id)?;
        let guard = state.read().await;
        let mut stats = QueueStats::default();
        for job in guard.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Sent => stats.sent += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Delivered => stats.delivered += 1,
            }
        }
        Ok(stats)
    }

    pub async fn player_stats(
        &self,
        club_id: Ulid,
        phone: &str,
    ) -> Result<PlayerStats, EngineError> {
        let state = self.club_or_err(&club_id)?;
        let guard = state.read().await;
        Ok(guard.stats.get(phone).copied().unwrap_or_default())
    }
}
