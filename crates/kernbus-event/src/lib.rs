//! Event contract for kernbus.
//!
//! This crate defines what travels over the bus and what handlers answer
//! with. It has no runtime dependencies, so tool executors and planners can
//! depend on it without pulling in the queue or kernel machinery.
//!
//! # Message Flow
//!
//! ```text
//! caller ──request()──► RequestRouter
//!                           │ Event { type: "tool.invoke", correlationId: c }
//!                           ▼
//!                    business Kernel ──drain──► tool handler
//!                                                  │ event.respond("tool.response", ..)
//!                           ┌──────────────────────┘
//!                           ▼
//!                    business Kernel ──drain──► one-shot waiter (c) ──► caller
//! ```
//!
//! # Crate Structure
//!
//! - [`Event`], [`EventBuilder`], [`EventMetadata`], [`Priority`] - the message
//! - [`ErrorPayload`], [`ERROR_MARKER`] - business errors inside responses
//! - [`HandlerOutcome`] - ack / retry / fatal verdict of a handler
//! - [`EventError`] - construction and decoding failures
//!
//! # Example
//!
//! ```
//! use kernbus_event::{Event, HandlerOutcome, Priority};
//! use kernbus_types::{CorrelationId, ErrorCode};
//! use serde_json::json;
//!
//! let request = Event::builder("tool.invoke", "acme")
//!     .correlation_id(CorrelationId::new())
//!     .priority(Priority::HIGH)
//!     .data(json!({"tool": "search", "q": "rust"}))
//!     .build()
//!     .unwrap();
//!
//! let response = request.respond("tool.response", Ok(json!(["a", "b"]))).unwrap();
//! assert_eq!(response.correlation_id(), request.correlation_id());
//!
//! let err = Event::new("", "acme", json!(null)).unwrap_err();
//! assert_eq!(err.code(), "EVENT_EMPTY_TYPE");
//!
//! assert!(HandlerOutcome::Ack.is_ack());
//! ```

mod error;
mod event;
mod outcome;
mod response;

pub use error::EventError;
pub use event::{Event, EventBuilder, EventMetadata, Priority};
pub use outcome::HandlerOutcome;
pub use response::{ErrorPayload, ERROR_MARKER};

pub use kernbus_types::{CorrelationId, EventId, TenantId};
