//! Long-running tasks of the bot
//!
//! Each actor runs as an independent tokio task and is driven through a handle
//! that sends commands over an mpsc channel.
//!
//! ```text
//!        ┌──────────────┐  fetch   ┌──────────────┐
//!        │  Scheduler   │─────────▶│ MetricSource │
//!        └──────┬───────┘          └──────────────┘
//!               │ transition
//!        ┌──────▼───────┐  list_all ┌─────────────────┐
//!        │ AlertManager │──────────▶│ SubscriberStore │
//!        │  + Notifier  │           └────────▲────────┘
//!        └──────┬───────┘                    │ add / remove
//!               │ sendMessage       ┌────────┴────────┐
//!               ▼                   │ UpdateListener  │◀── getUpdates
//!           Telegram                └─────────────────┘
//! ```
//!
//! - **Scheduler**: polls at the configured interval, backs off on failures and
//!   owns the alert state
//! - **UpdateListener**: answers bot commands through the `CommandHandler`

pub mod messages;
pub mod scheduler;
pub mod updates;
