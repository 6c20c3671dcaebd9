//! Event dispatcher and owner of the reconstructed state.

use log::trace;

use crate::config::Config;
use crate::event::Event;
use crate::notify::{Notification, Topic};
use crate::providers::{default_providers, CallbackTable, StateProvider};
use crate::state::State;

/// Feeds events, one at a time and in timestamp order, to the providers.
///
/// Providers run in a fixed order for every event; see
/// [`default_providers`](crate::providers::default_providers).
pub struct Automaton {
    state: State,
    tables: Vec<CallbackTable>,
    events: u64,
    handled: u64,
}

impl Automaton {
    pub fn new(config: Config) -> Self {
        Self::with_providers(config, default_providers())
    }

    pub fn with_providers(config: Config, providers: Vec<Box<dyn StateProvider>>) -> Self {
        let tables = providers
            .iter()
            .map(|p| CallbackTable::new(p.as_ref()))
            .collect();
        Self {
            state: State::new(config),
            tables,
            events: 0,
            handled: 0,
        }
    }

    pub fn process_event(&mut self, event: &Event) {
        self.events += 1;
        let mut handled = false;
        for table in &self.tables {
            if table.dispatch(&mut self.state, event) {
                trace!("{} handled {}@{}", table.provider(), event.name, event.timestamp);
                handled = true;
            }
        }
        if handled {
            self.handled += 1;
        }
    }

    pub fn process_events<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a Event>,
    {
        for event in events {
            self.process_event(event);
        }
    }

    pub fn subscribe<F>(&mut self, topic: Topic, callback: F)
    where
        F: FnMut(&Notification) + 'static,
    {
        self.state.bus.subscribe(topic, callback);
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    /// Events seen, and how many of them some provider handled.
    pub fn event_counts(&self) -> (u64, u64) {
        (self.events, self.handled)
    }
}

impl Default for Automaton {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
