//! Club, court and rule administration.

use chrono_tz::Tz;
use ulid::Ulid;

use crate::limits;
use crate::model::*;

use super::{Engine, EngineError, SharedClubState};

fn validate_hours(hours: &[Option<DayHours>; 7]) -> Result<(), EngineError> {
    for day in hours.iter().flatten() {
        if day.open >= day.close {
            return Err(EngineError::Validation("opening time must precede closing time"));
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("name must not be empty"));
    }
    if name.len() > limits::MAX_NAME_LEN {
        return Err(EngineError::Validation("name too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_club(
        &self,
        timezone: Tz,
        hours: [Option<DayHours>; 7],
        currency: String,
    ) -> Result<Ulid, EngineError> {
        validate_hours(&hours)?;
        if currency.trim().is_empty() {
            return Err(EngineError::Validation("currency must not be empty"));
        }
        if self.clubs.len() >= limits::MAX_CLUBS_PER_TENANT {
            return Err(EngineError::LimitExceeded("clubs per tenant"));
        }
        let id = Ulid::new();
        let event = Event::ClubCreated {
            id,
            timezone,
            hours,
            currency: currency.clone(),
        };
        self.wal_append(&event).await?;
        let config = ClubConfig {
            timezone,
            hours,
            currency,
        };
        self.clubs.insert(
            id,
            std::sync::Arc::new(tokio::sync::RwLock::new(ClubState::new(id, config))),
        );
        Ok(id)
    }

    pub async fn update_club_hours(
        &self,
        club_id: Ulid,
        hours: [Option<DayHours>; 7],
    ) -> Result<(), EngineError> {
        validate_hours(&hours)?;
        let state = self.club_or_err(&club_id)?;
        let mut guard = state.write().await;
        let event = Event::ClubHoursUpdated { id: club_id, hours };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_court(&self, club_id: Ulid, name: String) -> Result<Ulid, EngineError> {
        validate_name(&name)?;
        let state = self.club_or_err(&club_id)?;
        let mut guard = state.write().await;
        if guard.courts.len() >= limits::MAX_COURTS_PER_CLUB {
            return Err(EngineError::LimitExceeded("courts per club"));
        }
        let id = Ulid::new();
        let event = Event::CourtAdded {
            id,
            club_id,
            name,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    pub async fn add_pricing_rule(
        &self,
        club_id: Ulid,
        day_of_week: Option<u8>,
        start_time: &str,
        end_time: &str,
        price_per_hour: Cents,
    ) -> Result<Ulid, EngineError> {
        if let Some(day) = day_of_week
            && day > 6
        {
            return Err(EngineError::Validation("day of week must be 0..=6"));
        }
        let start = parse_hhmm(start_time)
            .ok_or(EngineError::Validation("start time must be HH:MM"))?;
        let end = parse_hhmm(end_time).ok_or(EngineError::Validation("end time must be HH:MM"))?;
        if start >= end {
            return Err(EngineError::Validation("rule window start must precede end"));
        }
        if price_per_hour < 0 {
            return Err(EngineError::Validation("price must not be negative"));
        }
        let state = self.club_or_err(&club_id)?;
        let mut guard = state.write().await;
        if guard.pricing_rules.len() >= limits::MAX_RULES_PER_CLUB {
            return Err(EngineError::LimitExceeded("pricing rules per club"));
        }
        let rule = PricingRule {
            id: Ulid::new(),
            day_of_week,
            window: Slot::new(start, end),
            price_per_hour,
            created_at: self.clock.now_ms(),
        };
        let id = rule.id;
        let event = Event::PricingRuleAdded { club_id, rule };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    pub async fn remove_pricing_rule(&self, rule_id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_entity_write(&rule_id).await?;
        if !guard.pricing_rules.iter().any(|r| r.id == rule_id) {
            return Err(EngineError::NotFound(rule_id));
        }
        let event = Event::PricingRuleRemoved {
            id: rule_id,
            club_id: guard.id,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_discount_rule(
        &self,
        club_id: Ulid,
        value: u8,
        conditions: DiscountConditions,
        enabled: bool,
    ) -> Result<Ulid, EngineError> {
        if value == 0 || value > 100 {
            return Err(EngineError::Validation("discount value must be 1..=100"));
        }
        if let DiscountConditions::HappyHour { days, window } = &conditions {
            if days.is_empty() {
                return Err(EngineError::Validation("happy hour needs at least one day"));
            }
            if window.start >= window.end {
                return Err(EngineError::Validation("happy hour window start must precede end"));
            }
            const DAYS: [&str; 7] = [
                "sunday",
                "monday",
                "tuesday",
                "wednesday",
                "thursday",
                "friday",
                "saturday",
            ];
            for day in days {
                if !DAYS.contains(&day.as_str()) {
                    return Err(EngineError::Validation("unknown day name in happy hour"));
                }
            }
        }
        let state = self.club_or_err(&club_id)?;
        let mut guard = state.write().await;
        if guard.discount_rules.len() >= limits::MAX_RULES_PER_CLUB {
            return Err(EngineError::LimitExceeded("discount rules per club"));
        }
        let rule = DiscountRule {
            id: Ulid::new(),
            value,
            conditions,
            enabled,
            created_at: self.clock.now_ms(),
        };
        let id = rule.id;
        let event = Event::DiscountRuleAdded { club_id, rule };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    pub async fn remove_discount_rule(&self, rule_id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_entity_write(&rule_id).await?;
        if !guard.discount_rules.iter().any(|r| r.id == rule_id) {
            return Err(EngineError::NotFound(rule_id));
        }
        let event = Event::DiscountRuleRemoved {
            id: rule_id,
            club_id: guard.id,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub(super) fn club_or_err(&self, id: &Ulid) -> Result<SharedClubState, EngineError> {
        self.get_club(id).ok_or(EngineError::NotFound(*id))
    }
}
