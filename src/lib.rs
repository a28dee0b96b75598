//! wirestate: resumable widget state and its sync protocol.
//!
//! A widget's full server-side state travels to the browser as a sealed,
//! self-verifying blob and comes back with every interaction, so the
//! server keeps no session memory between calls.
//!
//! | Module       | Role                                                  |
//! |--------------|-------------------------------------------------------|
//! | [`codec`]    | Seal and open state blobs (AES-256-GCM, key rotation) |
//! | [`envelope`] | Blob + public values tree exchanged per call          |
//! | [`widget`]   | Widget classes, operations, registry                  |
//! | [`dispatch`] | Stateless operation dispatch and watchers             |
//! | [`broker`]   | Group publish/subscribe over WebSocket                |
//! | [`runtime`]  | Client side: calls, rate gates, channel, events       |
//! | [`view`]     | Client view model and markup reconciliation           |

pub mod broker;
pub mod cli;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod logger;
pub mod protocol;
pub mod runtime;
pub mod utils;
pub mod view;
pub mod widget;
