/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod dsn;
pub mod job;
pub mod manager;

/// MIME type that marks a message as a delivery-instruction block.
pub const SPOOLMIME: &str = "application/x-citadel-delivery-list";

// Per-recipient delivery status classes, the first digit of the last SMTP
// reply.
pub const STATUS_UNTRIED: u8 = 0;
pub const STATUS_SUCCESS: u8 = 2;
pub const STATUS_TRANSIENT: u8 = 4;
pub const STATUS_PERMANENT: u8 = 5;

/// Retry cadence: every 30 minutes for the first four hours, then every
/// four hours until the five-day give-up.
pub const RETRY_FAST_WINDOW: u64 = 14_400;
pub const RETRY_FAST_INTERVAL: u64 = 1_800;
pub const RETRY_SLOW_INTERVAL: u64 = 14_400;
