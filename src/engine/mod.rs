mod bookings;
mod config;
mod conflict;
mod error;
mod ledger;
mod pricing;
mod queries;
mod scheduler;

pub use conflict::find_conflicts;
pub use error::{EngineError, SideEffectWarning};
pub use pricing::{first_eligible_discount, quote, resolve_rule};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::Clock;
use crate::dispatch::Dispatcher;
use crate::model::*;
use crate::wal::Wal;

pub type SharedClubState = Arc<RwLock<ClubState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch before the non-append command.
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }
                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes do
    // not leak into the next batch (these callers were told it failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// One tenant's booking engine: every club's state plus the WAL writer,
/// clock and messaging collaborator.
pub struct Engine {
    pub clubs: DashMap<Ulid, SharedClubState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) dispatcher: Arc<dyn Dispatcher>,
    pub(super) clock: Arc<dyn Clock>,
    /// Reverse lookup: entity (court/rule/booking/share/job) id → club id.
    pub(super) entity_to_club: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a ClubState (no locking — caller holds the
/// write lock). Replay, normal mutation and compaction all go through here,
/// so state after a crash is byte-for-byte what the mutation produced.
fn apply_to_club(state: &mut ClubState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ClubHoursUpdated { hours, .. } => {
            state.config.hours = *hours;
        }
        Event::CourtAdded { id, name, .. } => {
            state.courts.push(Court {
                id: *id,
                name: name.clone(),
            });
            entity_map.insert(*id, state.id);
        }
        Event::PricingRuleAdded { rule, .. } => {
            entity_map.insert(rule.id, state.id);
            state.pricing_rules.push(rule.clone());
        }
        Event::PricingRuleRemoved { id, .. } => {
            state.pricing_rules.retain(|r| r.id != *id);
            entity_map.remove(id);
        }
        Event::DiscountRuleAdded { rule, .. } => {
            entity_map.insert(rule.id, state.id);
            state.discount_rules.push(rule.clone());
        }
        Event::DiscountRuleRemoved { id, .. } => {
            state.discount_rules.retain(|r| r.id != *id);
            entity_map.remove(id);
        }
        Event::BookingCreated {
            booking,
            payment,
            shares,
            ..
        } => {
            entity_map.insert(booking.id, state.id);
            state
                .payments
                .entry(booking.id)
                .or_default()
                .push(payment.clone());
            for share in shares {
                entity_map.insert(share.id, state.id);
                state.insert_share(share.clone());
            }
            state.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(booking) = state.bookings.get_mut(id) {
                booking.status = *status;
            }
        }
        Event::BookingCancelled { id, .. } => {
            if let Some(booking) = state.bookings.get_mut(id) {
                booking.status = BookingStatus::Cancelled;
            }
            // Cascade: still-pending jobs fail with "cancelled"...
            let job_ids: Vec<Ulid> = state.jobs_by_booking.get(id).cloned().unwrap_or_default();
            for job_id in job_ids {
                if let Some(job) = state.jobs.get_mut(&job_id)
                    && matches!(job.status, JobStatus::Pending | JobStatus::Processing)
                {
                    job.status = JobStatus::Failed;
                    job.error = Some("cancelled".into());
                }
            }
            // ...and still-open shares move to cancelled. Completed shares
            // stay untouched for audit/refund.
            let share_ids: Vec<Ulid> = state.shares_by_booking.get(id).cloned().unwrap_or_default();
            for share_id in share_ids {
                if let Some(share) = state.shares.get_mut(&share_id)
                    && share.status.is_open()
                {
                    share.status = ShareStatus::Cancelled;
                }
            }
        }
        Event::SharesGenerated {
            booking_id, shares, ..
        } => {
            for share in shares {
                entity_map.insert(share.id, state.id);
                state.insert_share(share.clone());
            }
            if let Some(booking) = state.bookings.get_mut(booking_id) {
                booking.split_enabled = true;
                booking.split_count = shares.len() as u32;
            }
        }
        Event::ShareCompleted {
            id,
            method,
            reference,
            at,
            ..
        } => {
            let mut booking_id = None;
            if let Some(share) = state.shares.get_mut(id) {
                share.status = ShareStatus::Completed;
                share.completed_at = Some(*at);
                share.method = Some(*method);
                share.reference = reference.clone();
                booking_id = Some(share.booking_id);
            }
            // Last share completing settles the booking.
            if let Some(booking_id) = booking_id {
                let all_done = state
                    .shares_of(booking_id)
                    .iter()
                    .all(|s| s.status == ShareStatus::Completed);
                if all_done
                    && let Some(booking) = state.bookings.get_mut(&booking_id)
                {
                    booking.payment_status = PaymentStatus::Completed;
                    if booking.status == BookingStatus::Pending {
                        booking.status = BookingStatus::Confirmed;
                    }
                }
            }
        }
        Event::JobsScheduled { jobs, .. } => {
            for job in jobs {
                entity_map.insert(job.id, state.id);
                state.insert_job(job.clone());
            }
        }
        Event::JobSent { id, at, link, .. } => {
            if let Some(job) = state.jobs.get_mut(id) {
                job.status = JobStatus::Sent;
                job.sent_at = Some(*at);
                job.link = link.clone();
            }
        }
        Event::JobFailed { id, error, .. } => {
            if let Some(job) = state.jobs.get_mut(id) {
                job.status = JobStatus::Failed;
                job.error = Some(error.clone());
            }
        }
        Event::JobDelivered { id, .. } => {
            if let Some(job) = state.jobs.get_mut(id) {
                job.status = JobStatus::Delivered;
            }
        }
        Event::StatsRecorded { phone, stats, .. } => {
            state.stats.insert(phone.clone(), *stats);
        }
        // ClubCreated is handled at the DashMap level, not here.
        Event::ClubCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            clubs: DashMap::new(),
            wal_tx,
            dispatcher,
            clock,
            entity_to_club: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never block here: this may run inside an
        // async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::ClubCreated {
                    id,
                    timezone,
                    hours,
                    currency,
                } => {
                    let config = ClubConfig {
                        timezone: *timezone,
                        hours: *hours,
                        currency: currency.clone(),
                    };
                    engine
                        .clubs
                        .insert(*id, Arc::new(RwLock::new(ClubState::new(*id, config))));
                }
                other => {
                    if let Some(club_id) = event_club_id(other)
                        && let Some(state_arc) = engine.get_club(&club_id)
                    {
                        let mut guard = state_arc.try_write().expect("replay: uncontended write");
                        apply_to_club(&mut guard, other, &engine.entity_to_club);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write an event to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_club(&self, id: &Ulid) -> Option<SharedClubState> {
        self.clubs.get(id).map(|e| e.value().clone())
    }

    pub fn club_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_club.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call: the durable write precedes the
    /// in-memory flip, and both happen under the caller's club lock.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut ClubState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_club(state, event, &self.entity_to_club);
        Ok(())
    }

    /// Lookup entity → club, get the club, acquire its write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ClubState>, EngineError> {
        let club_id = self
            .club_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let state = self
            .get_club(&club_id)
            .ok_or(EngineError::NotFound(club_id))?;
        Ok(state.write_owned().await)
    }

    /// Rewrite the WAL with only the events needed to rebuild current
    /// state. In-memory `processing` claims are demoted to `pending` so a
    /// restart re-offers them to the sweep.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let club_ids: Vec<Ulid> = self.clubs.iter().map(|e| *e.key()).collect();
        for club_id in club_ids {
            let Some(entry) = self.clubs.get(&club_id) else {
                continue;
            };
            let state_arc = entry.value().clone();
            drop(entry);
            let state = state_arc.read().await;

            events.push(Event::ClubCreated {
                id: state.id,
                timezone: state.config.timezone,
                hours: state.config.hours,
                currency: state.config.currency.clone(),
            });
            for court in &state.courts {
                events.push(Event::CourtAdded {
                    id: court.id,
                    club_id: state.id,
                    name: court.name.clone(),
                });
            }
            for rule in &state.pricing_rules {
                events.push(Event::PricingRuleAdded {
                    club_id: state.id,
                    rule: rule.clone(),
                });
            }
            for rule in &state.discount_rules {
                events.push(Event::DiscountRuleAdded {
                    club_id: state.id,
                    rule: rule.clone(),
                });
            }

            let mut bookings: Vec<&Booking> = state.bookings.values().collect();
            bookings.sort_by_key(|b| (b.created_at, b.id));
            for booking in bookings {
                let payment = state
                    .payments
                    .get(&booking.id)
                    .and_then(|p| p.first())
                    .cloned()
                    .unwrap_or(Payment {
                        id: booking.id,
                        booking_id: booking.id,
                        amount: booking.price,
                        method: booking.payment_method,
                        status: booking.payment_status,
                    });
                let shares: Vec<SplitPayment> = state
                    .shares_of(booking.id)
                    .into_iter()
                    .cloned()
                    .collect();
                events.push(Event::BookingCreated {
                    club_id: state.id,
                    booking: booking.clone(),
                    payment,
                    shares,
                });
                let jobs: Vec<NotificationJob> = state
                    .jobs_of(booking.id)
                    .into_iter()
                    .map(|j| {
                        let mut job = j.clone();
                        if job.status == JobStatus::Processing {
                            job.status = JobStatus::Pending;
                        }
                        job
                    })
                    .collect();
                if !jobs.is_empty() {
                    events.push(Event::JobsScheduled {
                        club_id: state.id,
                        jobs,
                    });
                }
            }

            let mut phones: Vec<&String> = state.stats.keys().collect();
            phones.sort();
            for phone in phones {
                events.push(Event::StatsRecorded {
                    club_id: state.id,
                    phone: phone.clone(),
                    stats: state.stats[phone],
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the owning club id from an event (None for ClubCreated).
fn event_club_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ClubCreated { .. } => None,
        Event::ClubHoursUpdated { id, .. } => Some(*id),
        Event::CourtAdded { club_id, .. }
        | Event::PricingRuleAdded { club_id, .. }
        | Event::PricingRuleRemoved { club_id, .. }
        | Event::DiscountRuleAdded { club_id, .. }
        | Event::DiscountRuleRemoved { club_id, .. }
        | Event::BookingCreated { club_id, .. }
        | Event::BookingStatusChanged { club_id, .. }
        | Event::BookingCancelled { club_id, .. }
        | Event::SharesGenerated { club_id, .. }
        | Event::ShareCompleted { club_id, .. }
        | Event::JobsScheduled { club_id, .. }
        | Event::JobSent { club_id, .. }
        | Event::JobFailed { club_id, .. }
        | Event::JobDelivered { club_id, .. }
        | Event::StatsRecorded { club_id, .. } => Some(*club_id),
    }
}
