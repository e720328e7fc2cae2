//! The outbound dispatcher: consumes send jobs from the broker and walks each
//! one through an ordered pipeline of checks before the gateway call.
//!
//! The database, not the broker, is authoritative for outcomes: every job is
//! eventually acked and failures land as terminal row states. Application
//! retry happens by an operator re-queueing rows, never by broker redelivery.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use lapin::Channel;
use prometheus::{HistogramVec, IntCounterVec};
use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info_span, instrument, instrument::Instrumented, warn, Instrument};

use sengine_base::broker::{
    consume, ConsumeSpec, DRIP_EXCHANGE, DRIP_MESSAGES_QUEUE, DRIP_SEND_RK, INBOX_EXCHANGE,
    SEND_QUEUE, SEND_RK,
};
use sengine_base::TokenBucket;
use sengine_core::template::{personalize, TemplateVars};
use sengine_core::{
    phone, tokens, DripContactStatus, DripSendJob, FailReason, GatewayCredentials, InboxJob,
    EventKind, ScheduleStatus, SendSmsJob,
};
use twilio::{OutboundSms, SmsGateway};

use crate::db::entities::{contact, user, user_number};
use crate::db::{CourierDb, CreditError, StorableOutboundMessage};
use crate::webhook::WebhookProducer;

/// `reference_type` for drip-send ledger rows.
const REF_DRIP_SMS: &str = "drip_sms";
/// `reference_type` for direct-send ledger rows.
const REF_SMS: &str = "sms";

/// Everything one dispatch handler needs, shared by all consumers.
pub struct SendContext {
    pub db: CourierDb,
    pub gateway: Arc<dyn SmsGateway>,
    pub bucket: Arc<TokenBucket>,
    pub webhooks: WebhookProducer,
    pub status_callback_url: Option<String>,
    pub processed: IntCounterVec,
    pub gateway_seconds: HistogramVec,
}

/// Where a job ended up; the metrics outcome label.
#[derive(Clone, Debug)]
pub(crate) enum Outcome {
    Sent,
    Failed(FailReason),
    Duplicate,
    Cancelled,
    LoadTest,
    Dropped,
}

impl Outcome {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed(_) => "failed",
            Self::Duplicate => "duplicate",
            Self::Cancelled => "cancelled",
            Self::LoadTest => "load_test",
            Self::Dropped => "dropped",
        }
    }
}

/// Spawn a consumer for `drip.messages`.
pub fn spawn_drip_dispatcher(
    channel: Channel,
    ctx: Arc<SendContext>,
    prefetch: u16,
    per_message_delay: Option<Duration>,
    shutdown: watch::Receiver<bool>,
) -> Instrumented<JoinHandle<Result<()>>> {
    let spec = ConsumeSpec {
        queue: DRIP_MESSAGES_QUEUE,
        exchange: DRIP_EXCHANGE,
        routing_key: DRIP_SEND_RK,
        prefetch,
    };
    tokio::spawn(async move {
        consume(channel, spec, shutdown, move |data| {
            let ctx = ctx.clone();
            async move {
                let outcome = handle_drip_payload(&ctx, data).await;
                ctx.processed
                    .with_label_values(&[DRIP_MESSAGES_QUEUE, outcome.label()])
                    .inc();
                if let Some(delay) = per_message_delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
        })
        .await
    })
    .instrument(info_span!("DripDispatcher"))
}

/// Spawn a consumer for `inbox.send`.
pub fn spawn_send_dispatcher(
    channel: Channel,
    ctx: Arc<SendContext>,
    prefetch: u16,
    shutdown: watch::Receiver<bool>,
) -> Instrumented<JoinHandle<Result<()>>> {
    let spec = ConsumeSpec {
        queue: SEND_QUEUE,
        exchange: INBOX_EXCHANGE,
        routing_key: SEND_RK,
        prefetch,
    };
    tokio::spawn(async move {
        consume(channel, spec, shutdown, move |data| {
            let ctx = ctx.clone();
            async move {
                let outcome = handle_send_payload(&ctx, data).await;
                ctx.processed
                    .with_label_values(&[SEND_QUEUE, outcome.label()])
                    .inc();
                Ok(())
            }
        })
        .await
    })
    .instrument(info_span!("SendDispatcher"))
}

async fn handle_drip_payload(ctx: &SendContext, data: Vec<u8>) -> Outcome {
    let job: DripSendJob = match serde_json::from_slice(&data) {
        Ok(job) => job,
        Err(e) => {
            warn!(error = %e, "dropping malformed drip payload");
            return Outcome::Dropped;
        }
    };
    handle_drip_job(ctx, job).await
}

async fn handle_send_payload(ctx: &SendContext, data: Vec<u8>) -> Outcome {
    let job: InboxJob = match serde_json::from_slice(&data) {
        Ok(job) => job,
        Err(e) => {
            warn!(error = %e, "dropping malformed send payload");
            return Outcome::Dropped;
        }
    };
    let InboxJob::SendSms { data, .. } = job;
    handle_send_job(ctx, data).await
}

/// Synthetic load-test traffic: simulate handler latency, touch nothing.
async fn load_test_pause() {
    let millis = rand::thread_rng().gen_range(50..=200);
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

/// One drip send, in the strict step order of the dispatch pipeline.
///
/// Never errs: a failure at any step lands the scheduled row in a terminal
/// state and the broker message is acked. The broker is not used for
/// application-level retry.
#[instrument(skip(ctx, job), fields(scheduled_message_id = job.scheduled_message_id))]
pub(crate) async fn handle_drip_job(ctx: &SendContext, job: DripSendJob) -> Outcome {
    if job.is_load_test {
        load_test_pause().await;
        return Outcome::LoadTest;
    }

    match drip_pipeline(ctx, &job).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "drip send failed mid-pipeline; failing the row");
            let reason = FailReason::Internal(e.to_string());
            if let Err(mark_err) = ctx
                .db
                .mark_scheduled_failed(job.scheduled_message_id, &reason.to_string())
                .await
            {
                tracing::error!(error = %mark_err, "failed to mark scheduled row Failed");
            }
            if let Err(mark_err) = ctx
                .db
                .mark_drip_contact_failed(
                    job.drip_contact_id,
                    DripContactStatus::Failed,
                    &reason.to_string(),
                )
                .await
            {
                tracing::error!(error = %mark_err, "failed to mark drip contact Failed");
            }
            Outcome::Failed(reason)
        }
    }
}

/// Steps 2-6 plus the gateway leg. Errors from the pre-charge steps bubble
/// to [`handle_drip_job`], which turns them into a terminal failure; the
/// charge and everything after it compensate internally.
async fn drip_pipeline(ctx: &SendContext, job: &DripSendJob) -> Result<Outcome> {
    // Idempotency: the scheduled row (and its message, once one exists) is
    // the authority on whether this send already happened.
    let Some(sched) = ctx.db.scheduled_by_id(job.scheduled_message_id).await? else {
        warn!("scheduled row vanished, dropping job");
        return Ok(Outcome::Dropped);
    };
    let status = ScheduleStatus::try_from(sched.status)?;
    if status == ScheduleStatus::Cancelled {
        debug!("row cancelled upstream, dropping without side effects");
        return Ok(Outcome::Cancelled);
    }
    if status >= ScheduleStatus::Sent {
        debug!(?status, "row already past Sent, treating as duplicate delivery");
        return Ok(Outcome::Duplicate);
    }
    if let Some(message_id) = sched.message_id {
        if let Some(existing) = ctx.db.message_by_id(message_id).await? {
            if existing.provider_message_id.is_some() {
                debug!(message_id, "message already reached the gateway, acking duplicate");
                return Ok(Outcome::Duplicate);
            }
        }
    }

    let fail = |reason: FailReason, drip_status: DripContactStatus| {
        fail_drip(ctx, job, sched.id, reason, drip_status)
    };

    // Contact validity. No charge has occurred yet on any of these paths.
    let contact = match ctx.db.contact_by_id(job.contact_id).await? {
        None => return fail(FailReason::ContactMissing, DripContactStatus::Failed).await,
        Some(c) if c.deleted_at.is_some() => {
            return fail(FailReason::ContactMissing, DripContactStatus::Failed).await
        }
        Some(c) if c.opted_out => {
            return fail(FailReason::ContactOptedOut, DripContactStatus::Skipped).await
        }
        Some(c) if c.is_block => {
            return fail(FailReason::ContactBlocked, DripContactStatus::Skipped).await
        }
        Some(c) => c,
    };

    // User validity.
    let user = match ctx.db.user_by_id(job.user_id).await? {
        Some(u) if u.can_message() => u,
        _ => return fail(FailReason::UserSuspended, DripContactStatus::Failed).await,
    };

    // Sender resolution: the enrollment's pinned number when it matches a
    // provisioned one, else any active number.
    let numbers = ctx.db.active_user_numbers(job.user_id).await?;
    let Some(from) = resolve_sender(job.from_number.as_deref(), &numbers) else {
        return fail(FailReason::NoSenderNumber, DripContactStatus::Failed).await;
    };

    // Credit reservation.
    let cost = job.credit_cost();
    if !ctx.db.has_enough_credits(job.user_id, cost).await? {
        return fail(FailReason::InsufficientCredits, DripContactStatus::Failed).await;
    }
    let now = OffsetDateTime::now_utc();
    match ctx
        .db
        .deduct_credits(
            job.user_id,
            cost,
            "Drip message send",
            REF_DRIP_SMS,
            job.drip_id,
            now,
        )
        .await
    {
        Ok(receipt) => {
            debug!(balance_after = receipt.balance_after, "credit reserved");
        }
        Err(CreditError::Insufficient { .. }) => {
            return fail(FailReason::InsufficientCredits, DripContactStatus::Failed).await;
        }
        Err(CreditError::Db(e)) => return Err(e.into()),
    }

    // From here on every failure must compensate the debit.
    match drip_gateway_leg(ctx, job, sched.id, &contact, &user, from, cost).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            warn!(error = %e, "send leg failed after charge; refunding and failing the row");
            let reason = FailReason::Internal(e.to_string());
            let now = OffsetDateTime::now_utc();
            if let Err(refund_err) = ctx
                .db
                .refund_credits(
                    job.user_id,
                    cost,
                    &format!("Refund: {reason}"),
                    REF_DRIP_SMS,
                    job.drip_id,
                    now,
                )
                .await
            {
                tracing::error!(error = %refund_err, "refund failed; ledger needs reconciliation");
            }
            if let Err(mark_err) = ctx.db.mark_scheduled_failed(sched.id, &reason.to_string()).await {
                tracing::error!(error = %mark_err, "failed to mark scheduled row Failed");
            }
            if let Err(mark_err) = ctx
                .db
                .mark_drip_contact_failed(
                    job.drip_contact_id,
                    DripContactStatus::Failed,
                    &reason.to_string(),
                )
                .await
            {
                tracing::error!(error = %mark_err, "failed to mark drip contact Failed");
            }
            Ok(Outcome::Failed(reason))
        }
    }
}

/// The paced gateway call and its success/failure bookkeeping. Storage
/// errors bubble to the caller, which refunds.
async fn drip_gateway_leg(
    ctx: &SendContext,
    job: &DripSendJob,
    scheduled_id: i64,
    contact: &contact::Model,
    user: &user::Model,
    from: String,
    cost: i64,
) -> Result<Outcome> {
    ctx.bucket.acquire().await;

    let vars = TemplateVars {
        first: contact.first_name.clone().unwrap_or_default(),
        name: contact.full_name(),
        phone: contact.phone.clone(),
        email: contact.email.clone().unwrap_or_default(),
        campaign: String::new(),
    };
    let body = personalize(&job.message, &vars);

    let now = OffsetDateTime::now_utc();
    let b_ref = tokens::mint_b_ref(now);
    let uid = tokens::mint_uid();
    let status_callback = callback_url(ctx.status_callback_url.as_deref(), &b_ref);

    let started = Instant::now();
    let result = ctx
        .gateway
        .send(
            OutboundSms {
                from: from.clone(),
                to: job.to_number.clone(),
                body: body.clone(),
                media_url: job.media_url.clone(),
                status_callback,
            },
            tenant_credentials(user),
        )
        .await;
    let elapsed = started.elapsed().as_secs_f64();

    match (&result.provider_message_id, result.success) {
        (Some(sid), true) => {
            ctx.gateway_seconds.with_label_values(&["success"]).observe(elapsed);
            let message_id = ctx
                .db
                .insert_outbound_message(StorableOutboundMessage {
                    uid: &uid,
                    b_ref: &b_ref,
                    provider_message_id: sid,
                    from_number: &from,
                    to_number: &job.to_number,
                    body: &body,
                    media_url: job.media_url.as_deref(),
                    delivery_status: result.status.as_deref(),
                    is_drip: true,
                    drip_id: Some(job.drip_id),
                    user_id: job.user_id,
                    workspace_id: job.workspace_id,
                    contact_id: job.contact_id,
                    now,
                })
                .await?;
            ctx.db
                .mark_scheduled_sent(scheduled_id, message_id, sid, now)
                .await?;
            ctx.db
                .mark_drip_contact_sent(job.drip_contact_id, message_id, &b_ref, now)
                .await?;
            ctx.db
                .touch_contact_last_message(contact.id, &body, now, false)
                .await?;

            fan_out_outbound(ctx, job.user_id, job.workspace_id, message_id, &b_ref, now);
            Ok(Outcome::Sent)
        }
        _ => {
            ctx.gateway_seconds.with_label_values(&["failure"]).observe(elapsed);
            let reason = FailReason::Gateway {
                code: result.error_code.clone(),
                message: result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "gateway rejected the send".to_string()),
            };
            ctx.db
                .mark_scheduled_failed(scheduled_id, &reason.to_string())
                .await?;
            ctx.db
                .refund_credits(
                    job.user_id,
                    cost,
                    &format!("Refund: {reason}"),
                    REF_DRIP_SMS,
                    job.drip_id,
                    now,
                )
                .await?;
            ctx.db
                .mark_drip_contact_failed(
                    job.drip_contact_id,
                    DripContactStatus::Failed,
                    &reason.to_string(),
                )
                .await?;
            Ok(Outcome::Failed(reason))
        }
    }
}

async fn fail_drip(
    ctx: &SendContext,
    job: &DripSendJob,
    scheduled_id: i64,
    reason: FailReason,
    drip_status: DripContactStatus,
) -> Result<Outcome> {
    debug!(%reason, "drip send not viable");
    ctx.db
        .mark_scheduled_failed(scheduled_id, &reason.to_string())
        .await?;
    ctx.db
        .mark_drip_contact_failed(job.drip_contact_id, drip_status, &reason.to_string())
        .await?;
    Ok(Outcome::Failed(reason))
}

/// One direct (non-drip) send from `inbox.send`. The `messages` row already
/// exists; the send claims it by writing the provider id.
///
/// Never errs: a failure at any step lands the message row in a terminal
/// state and the broker message is acked.
#[instrument(skip(ctx, job), fields(message_id = job.message_id))]
pub(crate) async fn handle_send_job(ctx: &SendContext, job: SendSmsJob) -> Outcome {
    if job.is_load_test {
        load_test_pause().await;
        return Outcome::LoadTest;
    }

    match send_pipeline(ctx, &job).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "direct send failed mid-pipeline; failing the row");
            let reason = FailReason::Internal(e.to_string());
            if let Err(mark_err) = ctx
                .db
                .mark_message_failed(
                    job.message_id,
                    None,
                    &reason.to_string(),
                    OffsetDateTime::now_utc(),
                )
                .await
            {
                tracing::error!(error = %mark_err, "failed to mark message row Failed");
            }
            Outcome::Failed(reason)
        }
    }
}

/// Pre-charge checks and the charge itself. Errors bubble to
/// [`handle_send_job`], which turns them into a terminal failure; the
/// gateway leg compensates internally.
async fn send_pipeline(ctx: &SendContext, job: &SendSmsJob) -> Result<Outcome> {
    let Some(message) = ctx.db.message_by_id(job.message_id).await? else {
        warn!("message row vanished, dropping job");
        return Ok(Outcome::Dropped);
    };
    if message.provider_message_id.is_some() {
        debug!("message already reached the gateway, acking duplicate");
        return Ok(Outcome::Duplicate);
    }

    let now = OffsetDateTime::now_utc();
    let message_id = job.message_id;
    let fail = move |reason: FailReason| async move {
        ctx.db
            .mark_message_failed(message_id, None, &reason.to_string(), now)
            .await?;
        Ok(Outcome::Failed(reason))
    };

    match ctx.db.contact_by_id(job.contact_id).await? {
        None => return fail(FailReason::ContactMissing).await,
        Some(c) if c.deleted_at.is_some() => return fail(FailReason::ContactMissing).await,
        Some(c) if c.opted_out => return fail(FailReason::ContactOptedOut).await,
        Some(c) if c.is_block => return fail(FailReason::ContactBlocked).await,
        Some(_) => {}
    }
    let user = match ctx.db.user_by_id(job.user_id).await? {
        Some(u) if u.can_message() => u,
        _ => return fail(FailReason::UserSuspended).await,
    };

    // Direct sends may have been charged at enqueue time by the API.
    let cost = job.credit_cost();
    let mut charged_here = false;
    if !message.is_charged {
        if !ctx.db.has_enough_credits(job.user_id, cost).await? {
            return fail(FailReason::InsufficientCredits).await;
        }
        match ctx
            .db
            .deduct_credits(job.user_id, cost, "Message send", REF_SMS, job.message_id, now)
            .await
        {
            Ok(_) => charged_here = true,
            Err(CreditError::Insufficient { .. }) => {
                return fail(FailReason::InsufficientCredits).await;
            }
            Err(CreditError::Db(e)) => return Err(e.into()),
        }
    }

    // From here on every failure must compensate a charge made above.
    match send_gateway_leg(ctx, job, &user, cost, charged_here).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            warn!(error = %e, "send leg failed after charge; refunding and failing the row");
            let reason = FailReason::Internal(e.to_string());
            if charged_here {
                if let Err(refund_err) = ctx
                    .db
                    .refund_credits(
                        job.user_id,
                        cost,
                        &format!("Refund: {reason}"),
                        REF_SMS,
                        job.message_id,
                        now,
                    )
                    .await
                {
                    tracing::error!(error = %refund_err, "refund failed; ledger needs reconciliation");
                }
            }
            if let Err(mark_err) = ctx
                .db
                .mark_message_failed(job.message_id, None, &reason.to_string(), now)
                .await
            {
                tracing::error!(error = %mark_err, "failed to mark message row Failed");
            }
            Ok(Outcome::Failed(reason))
        }
    }
}

/// The paced gateway call of a direct send and its bookkeeping. Storage
/// errors bubble to the caller, which compensates.
async fn send_gateway_leg(
    ctx: &SendContext,
    job: &SendSmsJob,
    user: &user::Model,
    cost: i64,
    charged_here: bool,
) -> Result<Outcome> {
    let now = OffsetDateTime::now_utc();
    let (user_id, message_id) = (job.user_id, job.message_id);
    let refund = move |description: String| async move {
        ctx.db
            .refund_credits(user_id, cost, &description, REF_SMS, message_id, now)
            .await
    };

    ctx.bucket.acquire().await;

    let status_callback = job
        .status_callback_url
        .clone()
        .or_else(|| callback_url(ctx.status_callback_url.as_deref(), &job.b_ref));
    let credentials = job
        .twilio_credentials
        .clone()
        .or_else(|| tenant_credentials(user));

    let started = Instant::now();
    let result = ctx
        .gateway
        .send(
            OutboundSms {
                from: job.from_number.clone(),
                to: job.to_number.clone(),
                body: job.message.clone(),
                media_url: job.media_url.clone(),
                status_callback,
            },
            credentials,
        )
        .await;
    let elapsed = started.elapsed().as_secs_f64();

    match (&result.provider_message_id, result.success) {
        (Some(sid), true) => {
            ctx.gateway_seconds.with_label_values(&["success"]).observe(elapsed);
            let claimed = ctx
                .db
                .claim_provider_message_id(job.message_id, sid, result.status.as_deref(), now)
                .await?;
            if !claimed {
                // A concurrent consumer already sent this message; ours is
                // the losing copy, so compensate the charge.
                warn!("lost the provider-id claim race, refunding duplicate send");
                if charged_here {
                    refund("Refund: duplicate send detected".to_string()).await?;
                }
                return Ok(Outcome::Duplicate);
            }
            ctx.db
                .touch_contact_last_message(job.contact_id, &job.message, now, false)
                .await?;
            fan_out_outbound(ctx, job.user_id, job.workspace_id, job.message_id, &job.b_ref, now);
            Ok(Outcome::Sent)
        }
        _ => {
            ctx.gateway_seconds.with_label_values(&["failure"]).observe(elapsed);
            let reason = FailReason::Gateway {
                code: result.error_code.clone(),
                message: result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "gateway rejected the send".to_string()),
            };
            ctx.db
                .mark_message_failed(
                    job.message_id,
                    result.error_code.as_deref(),
                    &reason.to_string(),
                    now,
                )
                .await?;
            if charged_here {
                refund(format!("Refund: {reason}")).await?;
            }
            Ok(Outcome::Failed(reason))
        }
    }
}

/// Fire the `outbound_message` event without blocking the send path.
fn fan_out_outbound(
    ctx: &SendContext,
    user_id: i64,
    workspace_id: i64,
    message_id: i64,
    b_ref: &str,
    now: OffsetDateTime,
) {
    let webhooks = ctx.webhooks.clone();
    let data = serde_json::json!({
        "message_id": message_id,
        "b_ref": b_ref,
    });
    tokio::spawn(async move {
        webhooks
            .publish(user_id, workspace_id, EventKind::OutboundMessage, data, now)
            .await;
    });
}

/// Prefer the enrollment's pinned number when it fuzzy-matches a provisioned
/// one; otherwise any active number.
fn resolve_sender(preferred: Option<&str>, numbers: &[user_number::Model]) -> Option<String> {
    if let Some(want) = preferred {
        if let Some(hit) = numbers.iter().find(|n| phone::numbers_match(&n.phone, want)) {
            return Some(hit.phone.clone());
        }
    }
    numbers.first().map(|n| n.phone.clone())
}

/// Tenant gateway credentials, when the user carries a complete pair.
fn tenant_credentials(user: &user::Model) -> Option<GatewayCredentials> {
    match (&user.provider_account_id, &user.provider_auth_token) {
        (Some(account_sid), Some(auth_token)) => Some(GatewayCredentials {
            account_sid: account_sid.clone(),
            auth_token: auth_token.clone(),
        }),
        _ => None,
    }
}

/// The provider's status callback target, with the tracking token attached.
fn callback_url(base: Option<&str>, b_ref: &str) -> Option<String> {
    base.map(|base| {
        let sep = if base.contains('?') { '&' } else { '?' };
        format!("{base}{sep}bRef={b_ref}")
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn number(id: i64, phone: &str) -> user_number::Model {
        user_number::Model {
            id,
            user_id: 3,
            phone: phone.into(),
            status: "active".into(),
            deleted_at: None,
        }
    }

    #[test]
    fn sender_prefers_the_pinned_number() {
        let numbers = vec![
            number(1, "+15550001111"),
            number(2, "+15550002222"),
        ];
        assert_eq!(
            resolve_sender(Some("555-000-2222"), &numbers),
            Some("+15550002222".to_string())
        );
    }

    #[test]
    fn sender_falls_back_to_any_active_number() {
        let numbers = vec![number(1, "+15550001111")];
        assert_eq!(
            resolve_sender(Some("+19998887777"), &numbers),
            Some("+15550001111".to_string())
        );
        assert_eq!(resolve_sender(None, &numbers), Some("+15550001111".to_string()));
        assert_eq!(resolve_sender(None, &[]), None);
    }

    #[test]
    fn tenant_credentials_require_a_complete_pair() {
        let mut u = user::Model {
            id: 3,
            workspace_id: 4,
            provider_account_id: Some("AC_tenant".into()),
            provider_auth_token: Some("token".into()),
            messaging_status: "active".into(),
        };
        assert!(tenant_credentials(&u).is_some());
        u.provider_auth_token = None;
        assert!(tenant_credentials(&u).is_none());
    }

    #[test]
    fn callback_url_appends_the_tracking_token() {
        assert_eq!(
            callback_url(Some("https://api.example.com/status"), "DM-1-000001"),
            Some("https://api.example.com/status?bRef=DM-1-000001".to_string())
        );
        assert_eq!(
            callback_url(Some("https://api.example.com/status?v=2"), "DM-1-000001"),
            Some("https://api.example.com/status?v=2&bRef=DM-1-000001".to_string())
        );
        assert_eq!(callback_url(None, "DM-1-000001"), None);
    }

    #[test]
    fn outcome_labels_are_stable() {
        assert_eq!(Outcome::Sent.label(), "sent");
        assert_eq!(Outcome::Failed(FailReason::InsufficientCredits).label(), "failed");
        assert_eq!(Outcome::Duplicate.label(), "duplicate");
        assert_eq!(Outcome::LoadTest.label(), "load_test");
    }
}
