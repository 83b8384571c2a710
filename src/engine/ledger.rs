//! Split-payment ledger: share generation, completion and payment links.

use ulid::Ulid;

use crate::limits;
use crate::model::*;

use super::{Engine, EngineError};

/// Build the shares for a split booking. Every share carries the same
/// ceiling-rounded amount, so the collected total may exceed the price by
/// at most `count - 1` cents. Share 0 belongs to the requesting player;
/// the rest are numbered placeholders with contacts filled in as the
/// other payers claim them.
pub(super) fn build_shares(booking: &Booking, count: u32) -> Vec<SplitPayment> {
    let per_share = (booking.price + count as i64 - 1) / count as i64;
    (0..count)
        .map(|i| {
            let (name, phone, email) = if i == 0 {
                (
                    booking.player_name.clone(),
                    booking.player_phone.clone(),
                    booking.player_email.clone().unwrap_or_default(),
                )
            } else {
                (format!("Jugador {}", i + 1), String::new(), String::new())
            };
            SplitPayment {
                id: Ulid::new(),
                booking_id: booking.id,
                payer_name: name,
                payer_phone: phone,
                payer_email: email,
                amount: per_share,
                status: ShareStatus::Pending,
                completed_at: None,
                method: None,
                reference: None,
            }
        })
        .collect()
}

/// `/pay/{booking}?split={share}` — the path payers receive in messages.
pub(super) fn payment_link(booking_id: Ulid, share_id: Ulid) -> String {
    format!("/pay/{booking_id}?split={share_id}")
}

impl Engine {
    /// Generate split shares for an existing booking. Fails if the
    /// booking already has open shares or is in a terminal state.
    pub async fn generate_split_payments(
        &self,
        booking_id: Ulid,
        count: u32,
    ) -> Result<Vec<SplitPayment>, EngineError> {
        if !(limits::MIN_SPLIT_COUNT..=limits::MAX_SPLIT_COUNT).contains(&count) {
            return Err(EngineError::Validation("split count must be 2 to 50"));
        }
        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidTransition(
                "cannot split a completed or cancelled booking",
            ));
        }
        if guard
            .shares_of(booking_id)
            .iter()
            .any(|s| s.status.is_open())
        {
            return Err(EngineError::InvalidTransition(
                "booking already has open split shares",
            ));
        }
        let shares = build_shares(booking, count);
        let event = Event::SharesGenerated {
            club_id: guard.id,
            booking_id,
            shares: shares.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(booking_id = %booking_id, count, "split shares generated");
        Ok(shares)
    }

    /// Mark one share as paid. Completing an already-completed share is
    /// a no-op returning the stored record unchanged; failed and
    /// cancelled shares stay that way.
    ///
    /// The last share completing settles the booking: payment status goes
    /// to completed and a pending booking is promoted to confirmed.
    pub async fn complete_split_payment(
        &self,
        share_id: Ulid,
        method: PaymentMethod,
        reference: Option<String>,
    ) -> Result<SplitPayment, EngineError> {
        if let Some(r) = &reference
            && r.len() > limits::MAX_NAME_LEN
        {
            return Err(EngineError::Validation("payment reference too long"));
        }
        let mut guard = self.resolve_entity_write(&share_id).await?;
        let share = guard
            .shares
            .get(&share_id)
            .ok_or(EngineError::NotFound(share_id))?;
        match share.status {
            ShareStatus::Completed => return Ok(share.clone()),
            ShareStatus::Failed | ShareStatus::Cancelled => {
                return Err(EngineError::InvalidTransition(
                    "share is failed or cancelled",
                ));
            }
            ShareStatus::Pending | ShareStatus::Processing => {}
        }
        let event = Event::ShareCompleted {
            id: share_id,
            club_id: guard.id,
            method,
            reference,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(share_id = %share_id, "split share completed");
        Ok(guard.shares[&share_id].clone())
    }

    /// Payment link for a share. Read-only; never alters share state.
    pub async fn generate_payment_link(&self, share_id: Ulid) -> Result<String, EngineError> {
        let club_id = self
            .club_for_entity(&share_id)
            .ok_or(EngineError::NotFound(share_id))?;
        let state = self.club_or_err(&club_id)?;
        let guard = state.read().await;
        let share = guard
            .shares
            .get(&share_id)
            .ok_or(EngineError::NotFound(share_id))?;
        Ok(payment_link(share.booking_id, share.id))
    }
}
