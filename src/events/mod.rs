//! # Events Module
//!
//! Progress reporting for long-running operations.
//!
//! ## Design
//! The engine emits events through channels, so any front end
//! (CLI, GUI, daemon) can subscribe and display progress.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         match event {
//!             Event::Fingerprint(FingerprintEvent::Progress(p)) => {
//!                 println!("Fingerprinted {}/{}", p.completed, p.total)
//!             }
//!             Event::Dedupe(DedupeEvent::Moved { to, .. }) => println!("-> {}", to.display()),
//!             _ => {}
//!         }
//!     }
//! });
//!
//! ScanRun::new(&store, &fs, &config).with_events(sender).execute(&guard)?;
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
