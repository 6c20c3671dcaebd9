//! systate library - kernel state reconstruction from trace events.
//!
//! Feeds a time-ordered stream of kernel trace events (scheduler, IRQ,
//! syscall, block, network, memory and statedump events) through a set of
//! providers that rebuild a queryable model of the traced system: which thread
//! runs on each CPU, which FDs each process holds, which block requests and
//! interrupts are in flight.
//!
//! # Modules
//!
//! - [`automaton`] - Dispatcher owning the [`State`] and the providers
//! - [`providers`] - Per-domain event handlers
//! - [`state`] / [`model`] - The shared tables and their entity types
//! - [`notify`] - Synchronous notification bus for consumers of state changes
//! - [`source`] - JSON-lines event reader
//! - [`summary`] - End-of-run report
//!
//! # Example
//!
//! ```
//! use systate::{Automaton, Config, Event};
//!
//! let mut automaton = Automaton::new(Config::default());
//! automaton.process_event(
//!     &Event::new("sched_switch", 100, 0)
//!         .with("prev_tid", 0)
//!         .with("next_tid", 42)
//!         .with("next_comm", "bash"),
//! );
//! assert_eq!(automaton.state().current_tid(0), Some(42));
//! ```

pub mod automaton;
pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod notify;
pub mod providers;
pub mod source;
pub mod state;
pub mod summary;
pub mod syscalls;

// Re-export for convenience
pub use automaton::Automaton;
pub use config::Config;
pub use error::{Error, Result};
pub use event::{Event, FieldValue};
pub use notify::{Notification, NotificationBus, Topic};
pub use source::JsonLinesSource;
pub use state::State;
pub use summary::{Completions, Summary};
