//! Telegram HTML rendering of snapshots, alerts and bot replies

use std::time::Duration;

use crate::commands::StatusSummary;
use crate::monitors::{AlertStatus, Transition};
use crate::{BLOCKS_PER_EPOCH, MetricSnapshot};

pub const METRICS_URL: &str = "https://nockblocks.com/metrics?tab=mining";

/// Render a proofrate given in MP/s with a human-friendly unit.
pub fn format_proofrate(mps: f64) -> String {
    if mps >= 1000.0 {
        format!("{:.2} GP/s", mps / 1000.0)
    } else if mps >= 0.01 {
        format!("{:.2} MP/s", mps)
    } else {
        format!("{:.2} KP/s", mps * 1000.0)
    }
}

pub fn format_difficulty(difficulty_log2: f64) -> String {
    format!("2^{:.1}", difficulty_log2)
}

/// `9m 41s`
pub fn format_block_time(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

/// `3d 7h`
pub fn format_eta(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3_600)
}

pub fn format_epoch_progress(snapshot: &MetricSnapshot) -> String {
    let mined = BLOCKS_PER_EPOCH.saturating_sub(snapshot.blocks_to_adjustment);
    format!(
        "{}/{} ({:.1}%)",
        mined,
        BLOCKS_PER_EPOCH,
        snapshot.epoch_progress * 100.0
    )
}

pub fn trend_emoji(mps: f64) -> &'static str {
    if mps >= 2.0 {
        "🚀"
    } else if mps >= 1.5 {
        "✅"
    } else if mps >= 1.0 {
        "⚠️"
    } else {
        "🔴"
    }
}

pub fn metrics_message(snapshot: &MetricSnapshot) -> String {
    format!(
        "⛏️ <b>Nockchain Mining Metrics</b> {trend}\n\
         \n\
         <b>📊 Network Stats</b>\n\
         ├ Difficulty: <code>{difficulty}</code>\n\
         ├ Proofrate: <code>{proofrate}</code>\n\
         ├ Avg Block Time: <code>{block_time}</code>\n\
         └ Latest Block: <code>{height}</code>\n\
         \n\
         <b>📈 Epoch Progress</b>\n\
         ├ Progress: <code>{progress}</code>\n\
         ├ Blocks to Adj: <code>{blocks}</code>\n\
         ├ Est. Time to Adj: <code>{eta}</code>\n\
         └ Next Adj Ratio: <code>{ratio:.3}x</code>\n\
         \n\
         🔗 <a href=\"{METRICS_URL}\">View on NockBlocks</a>",
        trend = trend_emoji(snapshot.proofrate),
        difficulty = format_difficulty(snapshot.difficulty_log2),
        proofrate = format_proofrate(snapshot.proofrate),
        block_time = format_block_time(snapshot.avg_block_time),
        height = snapshot.latest_height,
        progress = format_epoch_progress(snapshot),
        blocks = snapshot.blocks_to_adjustment,
        eta = format_eta(snapshot.est_time_to_adjustment),
        ratio = snapshot.next_adjustment_ratio,
    )
}

/// Message broadcast when the alert state machine fires
pub fn alert_message(transition: Transition, snapshot: &MetricSnapshot, threshold: f64) -> String {
    let current = format_proofrate(snapshot.proofrate);
    let difficulty = format_difficulty(snapshot.difficulty_log2);

    match transition {
        Transition::Degraded => format!(
            "🔴 <b>Low Proofrate Alert!</b>\n\n\
             Network proofrate has dropped below the threshold of {threshold} MP/s\n\n\
             Current: <code>{current}</code>\n\
             Difficulty: <code>{difficulty}</code>\n\n\
             🔗 <a href='{METRICS_URL}'>View Details</a>"
        ),
        Transition::Recovered => format!(
            "✅ <b>Proofrate Recovered!</b>\n\n\
             Network proofrate is back above the threshold of {threshold} MP/s\n\n\
             Current: <code>{current}</code>\n\
             Difficulty: <code>{difficulty}</code>"
        ),
    }
}

pub fn status_message(summary: &StatusSummary) -> String {
    let subscription = if summary.subscribed {
        "✅ Subscribed"
    } else {
        "❌ Not subscribed"
    };

    let alert = match summary.alert.status {
        AlertStatus::Normal => "🟢 Normal",
        AlertStatus::Below => "🔴 Below threshold",
    };

    let last = match &summary.last_snapshot {
        Some(snapshot) => format!(
            "<code>{}</code> at {}",
            format_proofrate(snapshot.proofrate),
            snapshot.fetched_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => "no data yet".to_string(),
    };

    let mut text = format!(
        "📋 <b>Alert Status</b>\n\n\
         Subscription: {subscription}\n\
         Alert state: {alert}\n\
         Threshold: <code>{threshold} MP/s</code>\n\
         Last reading: {last}\n\
         Check interval: every {interval}\n\
         Subscribers: {count}",
        threshold = summary.threshold,
        interval = format_interval(summary.poll_interval),
        count = summary.subscriber_count,
    );

    if summary.consecutive_failures > 0 {
        text.push_str(&format!(
            "\n\n⚠️ Data provider unreachable for the last {} checks",
            summary.consecutive_failures
        ));
    }

    text
}

fn format_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} min", secs / 60)
    } else {
        format!("{} s", secs)
    }
}

pub fn welcome_message() -> String {
    format!(
        "👋 <b>Welcome to the Nockchain Proofrate Bot!</b>\n\n\
         I watch the Nockchain network and tell you when mining proofrate drops.\n\n\
         {}",
        command_list()
    )
}

pub fn help_message(threshold: f64) -> String {
    format!(
        "📖 <b>Help</b>\n\n\
         {}\n\n\
         Alerts fire once when the network proofrate falls below \
         <code>{threshold} MP/s</code> and once when it recovers.",
        command_list()
    )
}

fn command_list() -> &'static str {
    "<b>Commands</b>\n\
     • /proofrate - Current mining metrics\n\
     • /subscribe - Get alerts when proofrate changes\n\
     • /unsubscribe - Stop alerts\n\
     • /status - Your subscription and the alert state\n\
     • /help - Show this message"
}

pub fn subscribe_reply(newly_added: bool, threshold: f64) -> String {
    if newly_added {
        format!(
            "✅ <b>Subscribed!</b>\n\n\
             You'll get an alert when proofrate drops below <code>{threshold} MP/s</code> \
             and another when it recovers.\n\n\
             Use /unsubscribe to stop."
        )
    } else {
        "✅ <b>You're Already Subscribed!</b>\n\nUse /status to see the current alert state."
            .to_string()
    }
}

pub fn unsubscribe_reply(was_subscribed: bool) -> String {
    if was_subscribed {
        "🔕 <b>Unsubscribed</b>\n\nUse /subscribe to re-enable alerts.".to_string()
    } else {
        "ℹ️ You weren't subscribed.\n\nUse /subscribe to enable notifications.".to_string()
    }
}

pub fn storage_failure_reply() -> String {
    "⚠️ Could not save your preference right now. Please try again in a moment.".to_string()
}

pub fn provider_failure_reply() -> String {
    format!(
        "❌ Could not fetch metrics right now.\n\n\
         🔗 <a href='{METRICS_URL}'>Check NockBlocks directly</a>"
    )
}
