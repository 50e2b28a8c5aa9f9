//! Feed acquisition engine.
//!
//! Polls known RSS/Atom feeds on adaptive schedules with conditional
//! requests, deduplicates overlapping item windows, classifies every poll
//! into a single outcome and persists feed state in SQLite. A separate
//! crawler discovers new feeds from web search results.

pub mod config;
pub mod discovery;
pub mod feed;
pub mod schedule;
pub mod storage;
pub mod util;
