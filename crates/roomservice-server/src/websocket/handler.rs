//! Inbound frame handling.
//!
//! Clients do not drive any server behaviour over the channel; every text
//! frame they send is reflected back as an `echo` envelope for diagnostics.

use roomservice_core::Envelope;
use serde_json::Value;
use tracing::debug;

/// Build the `echo` reply for a client frame.
///
/// JSON payloads are reflected as parsed values, anything else as a JSON
/// string.
pub fn reflect(text: &str) -> Envelope {
    let data = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(_) => {
            debug!(len = text.len(), "client frame is not JSON, echoing as string");
            Value::String(text.to_owned())
        }
    };
    Envelope::echo(data)
}
