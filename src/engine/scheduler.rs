//! Notification scheduling and the sweep that delivers due jobs.

use ulid::Ulid;

use crate::clock::local_instant;
use crate::dispatch::dispatch_with_timeout;
use crate::limits;
use crate::model::*;

use super::{Engine, EngineError};

const HOUR_MS: Ms = 3_600_000;

fn format_amount(cents: Cents) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

/// Build the standard notification set for a fresh booking. The
/// confirmation fires immediately; reminders are only scheduled when
/// their fire time is still in the future.
pub(super) fn build_booking_jobs(
    config: &ClubConfig,
    booking: &Booking,
    court_name: &str,
    now: Ms,
) -> Vec<NotificationJob> {
    let start_at = local_instant(booking.date, booking.slot.start, config.timezone);
    let mut jobs = Vec::with_capacity(4);

    let job = |job_type, scheduled_for, message: String, link: Option<String>| NotificationJob {
        id: Ulid::new(),
        booking_id: booking.id,
        job_type,
        scheduled_for,
        status: JobStatus::Pending,
        message,
        link,
        error: None,
        sent_at: None,
    };

    jobs.push(job(
        JobType::Confirmation,
        now,
        format!(
            "Reserva confirmada: {} el {} de {} a {}. Total: {} {}.",
            court_name,
            booking.date,
            format_hhmm(booking.slot.start),
            format_hhmm(booking.slot.end),
            format_amount(booking.price),
            booking.currency,
        ),
        None,
    ));

    let reminder_24h = start_at - 24 * HOUR_MS;
    if reminder_24h > now {
        jobs.push(job(
            JobType::Reminder24h,
            reminder_24h,
            format!(
                "Recordatorio: tu reserva en {} es el {} a las {}.",
                court_name,
                booking.date,
                format_hhmm(booking.slot.start),
            ),
            None,
        ));
    }

    let reminder_2h = start_at - 2 * HOUR_MS;
    if reminder_2h > now {
        jobs.push(job(
            JobType::Reminder2h,
            reminder_2h,
            format!(
                "Recordatorio: tu reserva en {} empieza a las {}.",
                court_name,
                format_hhmm(booking.slot.start),
            ),
            None,
        ));
    }

    // Payment nudge only for online methods with money still outstanding.
    let payment_reminder = start_at - 12 * HOUR_MS;
    if booking.payment_status == PaymentStatus::Pending
        && !booking.payment_method.is_onsite()
        && payment_reminder > now
    {
        let link = format!("/pay/{}", booking.id);
        jobs.push(job(
            JobType::PaymentReminder,
            payment_reminder,
            format!(
                "Pago pendiente de tu reserva del {}. Completa tu pago en {}.",
                booking.date, link,
            ),
            Some(link),
        ));
    }

    jobs
}

struct ClaimedJob {
    club_id: Ulid,
    job_id: Ulid,
    phone: String,
    message: String,
}

impl Engine {
    /// (Re)schedule the standard notification set for an existing
    /// booking. Terminal bookings are rejected.
    pub async fn schedule_booking_notifications(
        &self,
        booking_id: Ulid,
    ) -> Result<Vec<NotificationJob>, EngineError> {
        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidTransition(
                "cannot schedule notifications for a completed or cancelled booking",
            ));
        }
        let court_name = guard
            .court(booking.court_id)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        let jobs = build_booking_jobs(&guard.config, booking, &court_name, self.clock.now_ms());
        let event = Event::JobsScheduled {
            club_id: guard.id,
            jobs: jobs.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(jobs)
    }

    /// Fail every still-pending job of a booking with "cancelled".
    /// `cancel_booking` does this as part of its cascade; this is the
    /// standalone form for bookings kept alive.
    pub async fn cancel_booking_notifications(
        &self,
        booking_id: Ulid,
    ) -> Result<usize, EngineError> {
        let mut guard = self.resolve_entity_write(&booking_id).await?;
        if !guard.bookings.contains_key(&booking_id) {
            return Err(EngineError::NotFound(booking_id));
        }
        let pending: Vec<Ulid> = guard
            .jobs_of(booking_id)
            .into_iter()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Processing))
            .map(|j| j.id)
            .collect();
        for job_id in &pending {
            let event = Event::JobFailed {
                id: *job_id,
                club_id: guard.id,
                error: "cancelled".into(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
        }
        Ok(pending.len())
    }

    /// Delivery-receipt hook: a sent job becomes delivered.
    pub async fn mark_delivered(&self, job_id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_entity_write(&job_id).await?;
        let job = guard.jobs.get(&job_id).ok_or(EngineError::NotFound(job_id))?;
        if job.status != JobStatus::Sent {
            return Err(EngineError::InvalidTransition("only sent jobs can be delivered"));
        }
        let event = Event::JobDelivered {
            id: job_id,
            club_id: guard.id,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// One sweep pass: claim up to `batch_size` due pending jobs (capped at
    /// `limits::MAX_SWEEP_BATCH`, which is also the default), dispatch them
    /// without any club lock held, then persist each outcome.
    ///
    /// The claim is an in-memory `processing` flip only. A crash between
    /// claim and outcome replays the job as pending, so delivery is
    /// at-least-once; two concurrent sweeps never pick the same job
    /// because claiming happens under the club write lock.
    pub async fn process_pending_notifications(
        &self,
        batch_size: Option<usize>,
    ) -> Result<SweepOutcome, EngineError> {
        let batch = batch_size
            .unwrap_or(limits::MAX_SWEEP_BATCH)
            .min(limits::MAX_SWEEP_BATCH);
        let now = self.clock.now_ms();
        let mut claimed: Vec<ClaimedJob> = Vec::new();

        let club_ids: Vec<Ulid> = self.clubs.iter().map(|e| *e.key()).collect();
        for club_id in club_ids {
            if claimed.len() >= batch {
                break;
            }
            let Some(state) = self.get_club(&club_id) else {
                continue;
            };
            let mut guard = state.write().await;
            let mut due: Vec<(Ms, Ulid)> = guard
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending && j.scheduled_for <= now)
                .map(|j| (j.scheduled_for, j.id))
                .collect();
            due.sort_unstable();
            due.truncate(batch - claimed.len());
            for (_, job_id) in due {
                let Some(job) = guard.jobs.get_mut(&job_id) else {
                    continue;
                };
                job.status = JobStatus::Processing;
                let message = job.message.clone();
                let booking_id = job.booking_id;
                let phone = guard
                    .bookings
                    .get(&booking_id)
                    .map(|b| b.player_phone.clone())
                    .unwrap_or_default();
                claimed.push(ClaimedJob {
                    club_id,
                    job_id,
                    phone,
                    message,
                });
            }
        }

        let mut outcome = SweepOutcome::default();
        for job in claimed {
            let result = dispatch_with_timeout(&*self.dispatcher, &job.phone, &job.message).await;
            let Some(state) = self.get_club(&job.club_id) else {
                continue;
            };
            let mut guard = state.write().await;
            let event = match &result {
                Ok(receipt) => Event::JobSent {
                    id: job.job_id,
                    club_id: job.club_id,
                    at: self.clock.now_ms(),
                    link: receipt.link.clone(),
                },
                Err(e) => Event::JobFailed {
                    id: job.job_id,
                    club_id: job.club_id,
                    error: e.to_string(),
                },
            };
            if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
                // Store failure aborts the sweep; release the claim so the
                // next pass retries.
                if let Some(j) = guard.jobs.get_mut(&job.job_id) {
                    j.status = JobStatus::Pending;
                }
                return Err(e);
            }
            match result {
                Ok(_) => {
                    outcome.sent += 1;
                    metrics::counter!(
                        crate::observability::NOTIFICATIONS_PROCESSED_TOTAL,
                        "outcome" => "sent"
                    )
                    .increment(1);
                }
                Err(e) => {
                    outcome.failed += 1;
                    metrics::counter!(
                        crate::observability::NOTIFICATIONS_PROCESSED_TOTAL,
                        "outcome" => "failed"
                    )
                    .increment(1);
                    tracing::warn!(job_id = %job.job_id, error = %e, "notification dispatch failed");
                }
            }
        }
        Ok(outcome)
    }

    /// Queue a one-off message for a booking, fired at `scheduled_for`.
    pub async fn schedule_custom_notification(
        &self,
        booking_id: Ulid,
        message: String,
        scheduled_for: Ms,
    ) -> Result<NotificationJob, EngineError> {
        if message.trim().is_empty() {
            return Err(EngineError::Validation("message must not be empty"));
        }
        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidTransition(
                "cannot schedule notifications for a completed or cancelled booking",
            ));
        }
        let job = NotificationJob {
            id: Ulid::new(),
            booking_id,
            job_type: JobType::Custom,
            scheduled_for,
            status: JobStatus::Pending,
            message,
            link: None,
            error: None,
            sent_at: None,
        };
        let event = Event::JobsScheduled {
            club_id: guard.id,
            jobs: vec![job.clone()],
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(job)
    }
}
