//! Timeout and retry policy (§4.3 "Watchdog timing"): a synchronous
//! `tick(now)` core the caller drives from a timer, wrapped in an async loop
//! for real deployments. Grounded on the per-status branches in
//! `original_source/RNS/Resource.py::__watchdog_job` and the
//! sync-core/async-wrapper split `styrene-rns-transport/src/resource.rs`
//! uses for its own watchdog task.

use std::time::{Duration, Instant};

use crate::config::ResourceConfig;
use crate::link::Link;
use crate::resource::receiver::ResourceReceiver;
use crate::resource::sender::ResourceSender;
use crate::resource::ResourceStatus;

/// What a sender-side tick decided should happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderAction {
    None,
    ResendAdvertisement,
    GiveUp,
}

/// What a receiver-side tick decided should happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverAction {
    None,
    ResendRequest,
    CheckCachedProof,
    GiveUp,
}

/// One watchdog pass over an outgoing resource. Only the `ADVERTISED`
/// (awaiting a first `REQ`) and pre-terminal states need active timeout
/// handling here — once parts start flowing, the receiver drives the pace
/// with its own `REQ` rounds and the sender only reacts.
pub fn tick_sender(sender: &mut ResourceSender, config: &ResourceConfig, link: &dyn Link, now: Instant) -> SenderAction {
    if sender.status.watchdog_should_stop() {
        return SenderAction::None;
    }

    let base_timeout = sender
        .timeout_override()
        .unwrap_or_else(|| link.rtt().mul_f64(link.traffic_timeout_factor()))
        .max(Duration::from_millis(1));
    let grace = Duration::from_secs_f64(config.sender_grace_time + config.processing_grace);
    let elapsed = now.saturating_duration_since(sender.last_activity());

    match sender.status {
        ResourceStatus::Queued | ResourceStatus::Advertised if elapsed >= base_timeout.max(grace) => {
            if sender.adv_retries() >= config.max_adv_retries {
                sender.cancel();
                SenderAction::GiveUp
            } else {
                sender.note_adv_retry(now);
                SenderAction::ResendAdvertisement
            }
        }
        _ => SenderAction::None,
    }
}

/// One watchdog pass over an incoming resource.
pub fn tick_receiver(recv: &mut ResourceReceiver, config: &ResourceConfig, link: &dyn Link, now: Instant) -> ReceiverAction {
    if recv.status.watchdog_should_stop() {
        return ReceiverAction::None;
    }

    let rtt_factor = if recv.retries() == 0 {
        config.part_timeout_factor
    } else {
        config.part_timeout_factor_after_rtt
    };
    let base_timeout = link.rtt().mul_f64(rtt_factor).max(Duration::from_millis(1));
    let per_retry = Duration::from_secs_f64(config.per_retry_delay * recv.retries() as f64);
    let grace = Duration::from_secs_f64(config.retry_grace_time);
    let timeout = base_timeout + per_retry + grace;

    let elapsed = now.saturating_duration_since(recv.last_activity());

    match recv.status {
        ResourceStatus::Transferring if elapsed >= timeout => {
            if recv.retries() >= config.max_retries {
                recv.cancel();
                ReceiverAction::GiveUp
            } else {
                recv.note_retry(now);
                ReceiverAction::ResendRequest
            }
        }
        ResourceStatus::AwaitingProof => {
            let proof_timeout = link.rtt().mul_f64(config.proof_timeout_factor).max(Duration::from_millis(1));
            if elapsed >= proof_timeout {
                ReceiverAction::CheckCachedProof
            } else {
                ReceiverAction::None
            }
        }
        _ => ReceiverAction::None,
    }
}

/// Caps how long the async watchdog loop sleeps between ticks, so a
/// resource that completes between two scheduled wakeups is still noticed
/// promptly (§4.3: `WATCHDOG_MAX_SLEEP`).
pub fn max_sleep(config: &ResourceConfig) -> Duration {
    Duration::from_millis(config.watchdog_max_sleep_ms)
}

/// Drives `tick` on a fixed cadence capped at `max_sleep`. The manager is
/// responsible for calling into `tick_sender`/`tick_receiver` for every
/// resource it still holds; this just owns the sleep/wake loop.
pub async fn run<F>(config: ResourceConfig, mut on_tick: F)
where
    F: FnMut(Instant) -> bool,
{
    let sleep_for = max_sleep(&config);
    loop {
        tokio::time::sleep(sleep_for).await;
        if !on_tick(Instant::now()) {
            break;
        }
    }
}
