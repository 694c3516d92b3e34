//! Root of the `checkgate-core` library.
//!
//! Receipt intake for a chat bot: extract a transaction identifier from a
//! submitted receipt, reject identifiers seen before, and whitelist the
//! users whose receipts were accepted. Admins elevated by password can pull
//! the whitelist as a CSV report.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the transport or the binary.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod conversation;
pub mod extract;
pub mod gate;
pub mod identifier;
pub mod intake;
pub mod replies;
pub mod report;
pub mod scratch;
pub mod session;
pub mod store;
pub mod transport;

pub use conversation::Conversation;
pub use identifier::Identifier;
pub use identifier::UserKey;
pub use intake::ReceiptIntake;
pub use session::ConversationState;
pub use store::SharedStores;
pub use transport::ChatPort;
