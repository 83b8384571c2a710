//! Line-delimited JSON protocol. One `hello` line authenticates and picks
//! the tenant; every following line is a single request and gets exactly
//! one response line back.

use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::tenant::TenantManager;

const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct Hello {
    op: String,
    tenant: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    CreateClub {
        timezone: Tz,
        hours: [Option<DayHours>; 7],
        currency: String,
    },
    UpdateClubHours {
        club_id: Ulid,
        hours: [Option<DayHours>; 7],
    },
    ListClubs,
    AddCourt {
        club_id: Ulid,
        name: String,
    },
    ListCourts {
        club_id: Ulid,
    },
    AddPricingRule {
        club_id: Ulid,
        #[serde(default)]
        day_of_week: Option<u8>,
        start_time: String,
        end_time: String,
        price_per_hour: Cents,
    },
    RemovePricingRule {
        rule_id: Ulid,
    },
    AddDiscountRule {
        club_id: Ulid,
        value: u8,
        conditions: DiscountConditions,
        #[serde(default = "default_true")]
        enabled: bool,
    },
    RemoveDiscountRule {
        rule_id: Ulid,
    },
    CreateBooking(BookingRequest),
    GetBooking {
        booking_id: Ulid,
    },
    ListBookings {
        club_id: Ulid,
        date: NaiveDate,
        #[serde(default)]
        court_id: Option<Ulid>,
        #[serde(default)]
        include_cancelled: bool,
    },
    CancelBooking {
        booking_id: Ulid,
    },
    CheckIn {
        booking_id: Ulid,
    },
    CompleteBooking {
        booking_id: Ulid,
    },
    CheckConflicts {
        club_id: Ulid,
        court_id: Ulid,
        date: NaiveDate,
        start_time: String,
        duration_min: Minutes,
    },
    CalculatePrice {
        club_id: Ulid,
        date: NaiveDate,
        start_time: String,
        duration_min: Minutes,
        #[serde(default)]
        payer_phone: Option<String>,
    },
    GenerateSplitPayments {
        booking_id: Ulid,
        count: u32,
    },
    CompleteSplitPayment {
        share_id: Ulid,
        method: PaymentMethod,
        #[serde(default)]
        reference: Option<String>,
    },
    PaymentLink {
        share_id: Ulid,
    },
    ListSplitPayments {
        booking_id: Ulid,
    },
    PaymentSummary {
        booking_id: Ulid,
    },
    ScheduleNotifications {
        booking_id: Ulid,
    },
    ScheduleCustomNotification {
        booking_id: Ulid,
        message: String,
        scheduled_for: Ms,
    },
    CancelNotifications {
        booking_id: Ulid,
    },
    ListNotifications {
        booking_id: Ulid,
    },
    ProcessNotifications {
        #[serde(default)]
        batch_size: Option<usize>,
    },
    MarkDelivered {
        job_id: Ulid,
    },
    QueueStats {
        club_id: Ulid,
    },
    PlayerStats {
        club_id: Ulid,
        phone: String,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conflicts: Option<Vec<Booking>>,
    },
}

impl Response {
    fn ok(data: impl Serialize) -> Self {
        Response::Ok {
            data: serde_json::to_value(data).ok(),
            warnings: Vec::new(),
        }
    }

    fn empty() -> Self {
        Response::Ok {
            data: None,
            warnings: Vec::new(),
        }
    }

    fn error(e: EngineError) -> Self {
        let conflicts = match &e {
            EngineError::SlotConflict(c) => Some(c.clone()),
            _ => None,
        };
        Response::Error {
            error: e.to_string(),
            conflicts,
        }
    }
}

fn request_name(req: &Request) -> &'static str {
    match req {
        Request::Ping => "ping",
        Request::CreateClub { .. } => "create_club",
        Request::UpdateClubHours { .. } => "update_club_hours",
        Request::ListClubs => "list_clubs",
        Request::AddCourt { .. } => "add_court",
        Request::ListCourts { .. } => "list_courts",
        Request::AddPricingRule { .. } => "add_pricing_rule",
        Request::RemovePricingRule { .. } => "remove_pricing_rule",
        Request::AddDiscountRule { .. } => "add_discount_rule",
        Request::RemoveDiscountRule { .. } => "remove_discount_rule",
        Request::CreateBooking(_) => "create_booking",
        Request::GetBooking { .. } => "get_booking",
        Request::ListBookings { .. } => "list_bookings",
        Request::CancelBooking { .. } => "cancel_booking",
        Request::CheckIn { .. } => "check_in",
        Request::CompleteBooking { .. } => "complete_booking",
        Request::CheckConflicts { .. } => "check_conflicts",
        Request::CalculatePrice { .. } => "calculate_price",
        Request::GenerateSplitPayments { .. } => "generate_split_payments",
        Request::CompleteSplitPayment { .. } => "complete_split_payment",
        Request::PaymentLink { .. } => "payment_link",
        Request::ListSplitPayments { .. } => "list_split_payments",
        Request::PaymentSummary { .. } => "payment_summary",
        Request::ScheduleNotifications { .. } => "schedule_notifications",
        Request::ScheduleCustomNotification { .. } => "schedule_custom_notification",
        Request::CancelNotifications { .. } => "cancel_notifications",
        Request::ListNotifications { .. } => "list_notifications",
        Request::ProcessNotifications { .. } => "process_notifications",
        Request::MarkDelivered { .. } => "mark_delivered",
        Request::QueueStats { .. } => "queue_stats",
        Request::PlayerStats { .. } => "player_stats",
    }
}

pub async fn execute(engine: &Engine, req: Request) -> Response {
    match req {
        Request::Ping => Response::ok("pong"),
        Request::CreateClub {
            timezone,
            hours,
            currency,
        } => match engine.create_club(timezone, hours, currency).await {
            Ok(id) => Response::ok(serde_json::json!({ "club_id": id })),
            Err(e) => Response::error(e),
        },
        Request::UpdateClubHours { club_id, hours } => {
            match engine.update_club_hours(club_id, hours).await {
                Ok(()) => Response::empty(),
                Err(e) => Response::error(e),
            }
        }
        Request::ListClubs => Response::ok(engine.list_clubs()),
        Request::AddCourt { club_id, name } => match engine.add_court(club_id, name).await {
            Ok(id) => Response::ok(serde_json::json!({ "court_id": id })),
            Err(e) => Response::error(e),
        },
        Request::ListCourts { club_id } => match engine.list_courts(club_id).await {
            Ok(courts) => Response::ok(courts),
            Err(e) => Response::error(e),
        },
        Request::AddPricingRule {
            club_id,
            day_of_week,
            start_time,
            end_time,
            price_per_hour,
        } => {
            match engine
                .add_pricing_rule(club_id, day_of_week, &start_time, &end_time, price_per_hour)
                .await
            {
                Ok(id) => Response::ok(serde_json::json!({ "rule_id": id })),
                Err(e) => Response::error(e),
            }
        }
        Request::RemovePricingRule { rule_id } => {
            match engine.remove_pricing_rule(rule_id).await {
                Ok(()) => Response::empty(),
                Err(e) => Response::error(e),
            }
        }
        Request::AddDiscountRule {
            club_id,
            value,
            conditions,
            enabled,
        } => {
            match engine
                .add_discount_rule(club_id, value, conditions, enabled)
                .await
            {
                Ok(id) => Response::ok(serde_json::json!({ "rule_id": id })),
                Err(e) => Response::error(e),
            }
        }
        Request::RemoveDiscountRule { rule_id } => {
            match engine.remove_discount_rule(rule_id).await {
                Ok(()) => Response::empty(),
                Err(e) => Response::error(e),
            }
        }
        Request::CreateBooking(req) => match engine.create_booking(req).await {
            Ok((booking, warnings)) => Response::Ok {
                data: serde_json::to_value(booking).ok(),
                warnings: warnings.iter().map(|w| w.to_string()).collect(),
            },
            Err(e) => Response::error(e),
        },
        Request::GetBooking { booking_id } => match engine.get_booking(booking_id).await {
            Ok(b) => Response::ok(b),
            Err(e) => Response::error(e),
        },
        Request::ListBookings {
            club_id,
            date,
            court_id,
            include_cancelled,
        } => {
            match engine
                .list_bookings(club_id, date, court_id, include_cancelled)
                .await
            {
                Ok(bookings) => Response::ok(bookings),
                Err(e) => Response::error(e),
            }
        }
        Request::CancelBooking { booking_id } => match engine.cancel_booking(booking_id).await {
            Ok(b) => Response::ok(b),
            Err(e) => Response::error(e),
        },
        Request::CheckIn { booking_id } => match engine.check_in(booking_id).await {
            Ok(b) => Response::ok(b),
            Err(e) => Response::error(e),
        },
        Request::CompleteBooking { booking_id } => {
            match engine.complete_booking(booking_id).await {
                Ok(b) => Response::ok(b),
                Err(e) => Response::error(e),
            }
        }
        Request::CheckConflicts {
            club_id,
            court_id,
            date,
            start_time,
            duration_min,
        } => {
            match engine
                .check_conflicts(club_id, court_id, date, &start_time, duration_min)
                .await
            {
                Ok(conflicts) => Response::ok(conflicts),
                Err(e) => Response::error(e),
            }
        }
        Request::CalculatePrice {
            club_id,
            date,
            start_time,
            duration_min,
            payer_phone,
        } => {
            match engine
                .calculate_price(club_id, date, &start_time, duration_min, payer_phone.as_deref())
                .await
            {
                Ok(price) => Response::ok(serde_json::json!({ "price": price })),
                Err(e) => Response::error(e),
            }
        }
        Request::GenerateSplitPayments { booking_id, count } => {
            match engine.generate_split_payments(booking_id, count).await {
                Ok(shares) => Response::ok(shares),
                Err(e) => Response::error(e),
            }
        }
        Request::CompleteSplitPayment {
            share_id,
            method,
            reference,
        } => {
            match engine
                .complete_split_payment(share_id, method, reference)
                .await
            {
                Ok(share) => Response::ok(share),
                Err(e) => Response::error(e),
            }
        }
        Request::PaymentLink { share_id } => match engine.generate_payment_link(share_id).await {
            Ok(link) => Response::ok(serde_json::json!({ "link": link })),
            Err(e) => Response::error(e),
        },
        Request::ListSplitPayments { booking_id } => {
            match engine.list_split_payments(booking_id).await {
                Ok(shares) => Response::ok(shares),
                Err(e) => Response::error(e),
            }
        }
        Request::PaymentSummary { booking_id } => {
            match engine.payment_summary(booking_id).await {
                Ok(summary) => Response::ok(summary),
                Err(e) => Response::error(e),
            }
        }
        Request::ScheduleNotifications { booking_id } => {
            match engine.schedule_booking_notifications(booking_id).await {
                Ok(jobs) => Response::ok(jobs),
                Err(e) => Response::error(e),
            }
        }
        Request::ScheduleCustomNotification {
            booking_id,
            message,
            scheduled_for,
        } => {
            match engine
                .schedule_custom_notification(booking_id, message, scheduled_for)
                .await
            {
                Ok(job) => Response::ok(job),
                Err(e) => Response::error(e),
            }
        }
        Request::CancelNotifications { booking_id } => {
            match engine.cancel_booking_notifications(booking_id).await {
                Ok(cancelled) => Response::ok(serde_json::json!({ "cancelled": cancelled })),
                Err(e) => Response::error(e),
            }
        }
        Request::ListNotifications { booking_id } => {
            match engine.list_notifications(booking_id).await {
                Ok(jobs) => Response::ok(jobs),
                Err(e) => Response::error(e),
            }
        }
        Request::ProcessNotifications { batch_size } => {
            match engine.process_pending_notifications(batch_size).await {
                Ok(outcome) => Response::ok(outcome),
                Err(e) => Response::error(e),
            }
        }
        Request::MarkDelivered { job_id } => match engine.mark_delivered(job_id).await {
            Ok(()) => Response::empty(),
            Err(e) => Response::error(e),
        },
        Request::QueueStats { club_id } => match engine.queue_stats(club_id).await {
            Ok(stats) => Response::ok(stats),
            Err(e) => Response::error(e),
        },
        Request::PlayerStats { club_id, phone } => {
            match engine.player_stats(club_id, &phone).await {
                Ok(stats) => Response::ok(stats),
                Err(e) => Response::error(e),
            }
        }
    }
}

/// Drive one client connection: hello handshake, then request/response
/// lines until the peer hangs up.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    let Some(first) = framed.next().await else {
        return Ok(()); // closed before hello
    };
    let first = first?;
    let engine = match serde_json::from_str::<Hello>(&first) {
        Ok(hello) if hello.op == "hello" => {
            if hello.password != password {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                let resp = Response::Error {
                    error: "authentication failed".into(),
                    conflicts: None,
                };
                framed.send(serde_json::to_string(&resp)?).await?;
                return Ok(());
            }
            match tenant_manager.get_or_create(&hello.tenant) {
                Ok(engine) => engine,
                Err(e) => {
                    let resp = Response::Error {
                        error: format!("tenant error: {e}"),
                        conflicts: None,
                    };
                    framed.send(serde_json::to_string(&resp)?).await?;
                    return Ok(());
                }
            }
        }
        _ => {
            let resp = Response::Error {
                error: "first message must be a hello with tenant and password".into(),
                conflicts: None,
            };
            framed.send(serde_json::to_string(&resp)?).await?;
            return Ok(());
        }
    };
    framed
        .send(serde_json::to_string(&Response::empty())?)
        .await?;

    while let Some(line) = framed.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                let name = request_name(&request);
                metrics::counter!(observability::COMMANDS_TOTAL, "command" => name).increment(1);
                let start = std::time::Instant::now();
                let response = execute(&engine, request).await;
                metrics::histogram!(observability::COMMAND_DURATION_SECONDS, "command" => name)
                    .record(start.elapsed().as_secs_f64());
                response
            }
            Err(e) => Response::Error {
                error: format!("malformed request: {e}"),
                conflicts: None,
            },
        };
        framed.send(serde_json::to_string(&response)?).await?;
    }
    Ok(())
}
