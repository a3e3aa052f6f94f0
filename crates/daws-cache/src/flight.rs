// SPDX-License-Identifier: MIT OR Apache-2.0
//! Single-flight coalescing.
//!
//! Among N concurrent callers with the same fingerprint, exactly one (the
//! holder) runs the producer; the rest wait on the holder's [`Flight`] and
//! share its result. A holder that is cancelled mid-produce abandons the
//! flight, waking the waiters so the next one can take over.

use daws_core::{Envelope, ErrorEnvelope, Fingerprint};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Shared state for one in-flight computation.
pub struct Flight {
    notify: Notify,
    state: Mutex<FlightState>,
}

enum FlightState {
    Running,
    Done(Result<Envelope, ErrorEnvelope>),
    Abandoned,
}

impl Flight {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            state: Mutex::new(FlightState::Running),
        }
    }

    /// Wait for the holder to finish.
    ///
    /// Returns the holder's result, or `None` when the holder was cancelled
    /// and the caller should retry (and may become the new holder).
    pub async fn join(&self) -> Option<Result<Envelope, ErrorEnvelope>> {
        loop {
            // Register interest before checking state, so a publish between
            // the check and the await still wakes us.
            let notified = self.notify.notified();
            match &*self.state.lock().expect("flight lock poisoned") {
                FlightState::Done(result) => return Some(result.clone()),
                FlightState::Abandoned => return None,
                FlightState::Running => {}
            }
            notified.await;
        }
    }

    fn publish(&self, result: Result<Envelope, ErrorEnvelope>) {
        *self.state.lock().expect("flight lock poisoned") = FlightState::Done(result);
        self.notify.notify_waiters();
    }

    fn abandon(&self) {
        let mut state = self.state.lock().expect("flight lock poisoned");
        if matches!(*state, FlightState::Running) {
            *state = FlightState::Abandoned;
        }
        drop(state);
        self.notify.notify_waiters();
    }
}

/// The per-fingerprint flight table.
#[derive(Default)]
pub struct SingleFlight {
    flights: Mutex<HashMap<Fingerprint, Arc<Flight>>>,
}

/// Whether the caller became the holder or joins an existing flight.
pub enum Role<'a> {
    /// This caller owns the flight and must run the producer.
    Holder(HolderGuard<'a>),
    /// Another caller is producing; join its flight.
    Waiter(Arc<Flight>),
}

impl SingleFlight {
    /// Enter the flight for `fingerprint`, becoming holder if none exists.
    pub fn begin(&self, fingerprint: &Fingerprint) -> Role<'_> {
        let mut flights = self.flights.lock().expect("flight table lock poisoned");
        if let Some(existing) = flights.get(fingerprint) {
            return Role::Waiter(Arc::clone(existing));
        }
        let flight = Arc::new(Flight::new());
        flights.insert(fingerprint.clone(), Arc::clone(&flight));
        Role::Holder(HolderGuard {
            owner: self,
            fingerprint: fingerprint.clone(),
            flight,
            published: false,
        })
    }

    /// Number of fingerprints currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.lock().expect("flight table lock poisoned").len()
    }

    fn finish(&self, fingerprint: &Fingerprint) {
        self.flights
            .lock()
            .expect("flight table lock poisoned")
            .remove(fingerprint);
    }
}

/// Removes the flight from the table when the holder is done — or, if the
/// holder is dropped without publishing (cancellation), abandons it so the
/// next waiter retries.
pub struct HolderGuard<'a> {
    owner: &'a SingleFlight,
    fingerprint: Fingerprint,
    flight: Arc<Flight>,
    published: bool,
}

impl HolderGuard<'_> {
    /// Publish the producer's result to every waiter.
    pub fn publish(&mut self, result: &Result<Envelope, ErrorEnvelope>) {
        self.flight.publish(result.clone());
        self.published = true;
    }
}

impl Drop for HolderGuard<'_> {
    fn drop(&mut self) {
        self.owner.finish(&self.fingerprint);
        if !self.published {
            self.flight.abandon();
        }
    }
}

impl std::fmt::Debug for SingleFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
