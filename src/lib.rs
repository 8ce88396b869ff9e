//! # Donor Booking Bot
//!
//! A Telegram bot that registers blood/plasma donors, watches the donation
//! centre's appointment calendar, and books a slot on the donor's behalf by
//! driving a headless browser through the centre's web form.
//!
//! ## Features
//! - Conversational registration with donor eligibility tracking
//! - Calendar and time-slot scanning of the centre's booking widget
//! - Form submission with a human-in-the-loop captcha round
//! - Periodic polling with duplicate-free notifications
//! - Persistent sessions stored in SQLite

/// Conversation state machine, booking orchestrator and result classification
pub mod booking;
/// Telegram commands, handlers and the transport seam
pub mod bot;
/// Headless browser abstraction and per-user session management
pub mod browser;
/// Configuration management and environment variables
pub mod config;
/// Database models, connections, and migrations
pub mod database;
/// Calendar and interval scanning of the booking site
pub mod scanner;
/// Selectors, URLs and in-page scripts of the booking site
pub mod site;
/// Background services: polling, idle session reaping, health endpoint
pub mod services;
/// Utility functions for dates, validation, feedback and logging
pub mod utils;
