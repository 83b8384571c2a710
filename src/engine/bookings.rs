//! Booking lifecycle: create (conflict check, quote, persist, side
//! effects), cancel with cascade, check-in and completion.

use chrono::Days;
use ulid::Ulid;

use crate::clock::{local_date, weekday_index};
use crate::limits;
use crate::model::*;

use super::{Engine, EngineError, SideEffectWarning, conflict, pricing, scheduler};

fn validate_request(req: &BookingRequest) -> Result<(Minutes, String), EngineError> {
    let start = parse_hhmm(&req.start_time)
        .ok_or(EngineError::Validation("start time must be HH:MM"))?;
    if req.duration_min < limits::MIN_BOOKING_MINUTES || req.duration_min > limits::MAX_BOOKING_MINUTES
    {
        return Err(EngineError::Validation("duration must be 30 to 240 minutes"));
    }
    if req.player_name.trim().is_empty() {
        return Err(EngineError::Validation("player name must not be empty"));
    }
    if req.player_name.len() > limits::MAX_NAME_LEN {
        return Err(EngineError::Validation("player name too long"));
    }
    let phone: String = req
        .player_phone
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if phone.chars().filter(|c| c.is_ascii_digit()).count() < limits::MIN_PHONE_LEN {
        return Err(EngineError::Validation("phone must have at least 10 digits"));
    }
    if req.split_enabled
        && !(limits::MIN_SPLIT_COUNT..=limits::MAX_SPLIT_COUNT).contains(&req.split_count)
    {
        return Err(EngineError::Validation("split count must be 2 to 50"));
    }
    Ok((start, phone))
}

impl Engine {
    /// Create a booking. The club write lock is held from the conflict
    /// check through the durable insert, so two concurrent requests for
    /// the same slot cannot both succeed.
    ///
    /// Stats recording and notification scheduling run after the booking
    /// is durable; their failures come back as warnings, never as a
    /// failure of the booking itself.
    pub async fn create_booking(
        &self,
        req: BookingRequest,
    ) -> Result<(Booking, Vec<SideEffectWarning>), EngineError> {
        let (start, phone) = validate_request(&req)?;
        let slot = Slot::new(start, start + req.duration_min);

        let state = self.club_or_err(&req.club_id)?;
        let mut guard = state.write().await;

        let court = guard
            .court(req.court_id)
            .ok_or(EngineError::NotFound(req.court_id))?;
        let court_name = court.name.clone();

        if guard.bookings.len() >= limits::MAX_BOOKINGS_PER_CLUB {
            return Err(EngineError::LimitExceeded("bookings per club"));
        }

        let now = self.clock.now_ms();
        let today = local_date(now, guard.config.timezone);
        if req.date < today {
            return Err(EngineError::PastDate);
        }
        let horizon = today
            .checked_add_days(Days::new(limits::MAX_ADVANCE_DAYS as u64))
            .ok_or(EngineError::Validation("booking date out of range"))?;
        if req.date > horizon {
            return Err(EngineError::TooFarInFuture {
                max_days: limits::MAX_ADVANCE_DAYS,
            });
        }

        let weekday = weekday_index(req.date);
        let Some(day_hours) = guard.config.hours[weekday as usize] else {
            return Err(EngineError::Validation("club is closed on the requested day"));
        };
        if slot.end > day_hours.close {
            return Err(EngineError::ClosingTimeExceeded {
                end: slot.end,
                closes: day_hours.close,
            });
        }

        let conflicts = conflict::find_conflicts(&guard, req.court_id, req.date, slot);
        if !conflicts.is_empty() {
            metrics::counter!(crate::observability::BOOKINGS_CONFLICTED_TOTAL).increment(1);
            return Err(EngineError::SlotConflict(conflicts));
        }

        let price = pricing::quote(&guard, req.date, start, req.duration_min, Some(&phone), now)?;

        let booking = Booking {
            id: Ulid::new(),
            club_id: req.club_id,
            court_id: req.court_id,
            date: req.date,
            slot,
            price,
            currency: guard.config.currency.clone(),
            player_name: req.player_name.trim().to_string(),
            player_phone: phone.clone(),
            player_email: req.player_email.clone(),
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: req.payment_method,
            split_enabled: req.split_enabled,
            split_count: if req.split_enabled { req.split_count } else { 0 },
            notes: req.notes.clone(),
            created_at: now,
        };
        let payment = Payment {
            id: Ulid::new(),
            booking_id: booking.id,
            amount: price,
            method: req.payment_method,
            status: PaymentStatus::Pending,
        };
        let shares = if req.split_enabled {
            super::ledger::build_shares(&booking, req.split_count)
        } else {
            Vec::new()
        };

        let event = Event::BookingCreated {
            club_id: req.club_id,
            booking: booking.clone(),
            payment,
            shares,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);

        let mut warnings = Vec::new();

        // Side effect 1: per-player aggregates. Full snapshot so replay
        // and compaction agree.
        let prev = guard.stats.get(&phone).copied().unwrap_or_default();
        let stats_event = Event::StatsRecorded {
            club_id: req.club_id,
            phone: phone.clone(),
            stats: PlayerStats {
                total_bookings: prev.total_bookings + 1,
                total_spent: prev.total_spent + price,
                last_booking_at: Some(now),
            },
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &stats_event).await {
            tracing::warn!(booking_id = %booking.id, error = %e, "stats update failed");
            warnings.push(SideEffectWarning {
                context: "stats update",
                detail: e.to_string(),
            });
        }

        // Side effect 2: notification schedule.
        let jobs = scheduler::build_booking_jobs(&guard.config, &booking, &court_name, now);
        if !jobs.is_empty() {
            let jobs_event = Event::JobsScheduled {
                club_id: req.club_id,
                jobs,
            };
            if let Err(e) = self.persist_and_apply(&mut guard, &jobs_event).await {
                tracing::warn!(booking_id = %booking.id, error = %e, "notification scheduling failed");
                warnings.push(SideEffectWarning {
                    context: "notification scheduling",
                    detail: e.to_string(),
                });
            }
        }

        tracing::info!(
            booking_id = %booking.id,
            club_id = %req.club_id,
            court_id = %req.court_id,
            date = %req.date,
            price,
            "booking created"
        );
        Ok((booking, warnings))
    }

    /// Cancel a booking. One durable record; the in-memory apply cascades
    /// to pending notification jobs and open split shares.
    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidTransition(
                "booking is already completed or cancelled",
            ));
        }
        let event = Event::BookingCancelled {
            id: booking_id,
            club_id: guard.id,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(booking_id = %booking_id, "booking cancelled");
        Ok(guard.bookings[&booking_id].clone())
    }

    /// Mark the player as arrived. Pending or confirmed only.
    pub async fn check_in(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(
            booking_id,
            &[BookingStatus::Pending, BookingStatus::Confirmed],
            BookingStatus::InProgress,
            "check-in requires a pending or confirmed booking",
        )
        .await
    }

    /// Close out a session that was checked in.
    pub async fn complete_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(
            booking_id,
            &[BookingStatus::InProgress],
            BookingStatus::Completed,
            "completion requires a checked-in booking",
        )
        .await
    }

    async fn transition(
        &self,
        booking_id: Ulid,
        from: &[BookingStatus],
        to: BookingStatus,
        msg: &'static str,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if !from.contains(&booking.status) {
            return Err(EngineError::InvalidTransition(msg));
        }
        let event = Event::BookingStatusChanged {
            id: booking_id,
            club_id: guard.id,
            status: to,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.bookings[&booking_id].clone())
    }
}
