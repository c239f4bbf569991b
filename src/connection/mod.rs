// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device connection supervision.
//!
//! One [`ConnectionSupervisor`] per registered device owns that device's
//! MQTT session: it connects, reconnects with [`ReconnectionPolicy`]
//! backoff, declares silent connections stale, and reports
//! [`ConnectionState`] changes and decoded snapshots through a
//! [`SupervisorEvent`] sink.

mod backoff;
mod state;
mod supervisor;

pub use backoff::ReconnectionPolicy;
pub use state::{ConnectionState, FailureReason};
pub use supervisor::{
    ConnectionSupervisor, EventSink, SupervisorContext, SupervisorEvent, SupervisorHandle,
};
