//! Alerting for FleetWatch.
//!
//! [`AlertEngine`] owns the rule set, the open-alert table and a bounded
//! alert history. State updates happen synchronously under a lock in
//! [`AlertEngine::process`]; delivery through the [`Dispatcher`] happens
//! afterwards in [`AlertEngine::notify`], so a slow webhook never blocks
//! evaluation.

#![forbid(unsafe_code)]

pub mod engine;
pub mod error;
pub mod notify;
pub mod rules;

pub use engine::{AlertEngine, DEFAULT_MAX_HISTORY, Fired, ProcessOutcome};
pub use error::{NotificationError, RuleError};
pub use notify::{ChannelDelivery, Dispatcher, LogNotifier, Notifier, WebhookNotifier};
pub use rules::{AlertRuleConfig, RuleOutcome, evaluate, message, severity};
