//! Trigger adapters that invoke the handlers and log their results.
//!
//! Both adapters swallow handler errors after logging them, so one failed
//! invocation never stops its trigger loop.

pub mod change_feed;
pub mod timer;
