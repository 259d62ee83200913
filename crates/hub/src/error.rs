use thiserror::Error;

/// Domain errors raised by the live-state core.
///
/// Startup and database paths use `anyhow`; these variants are the ones the
/// router, dispatcher and web layer need to tell apart.
#[derive(Debug, Error)]
pub enum HubError {
    /// Payload did not have the expected shape. Absorbed locally, never
    /// shown to the dashboard user.
    #[error("unparseable payload: {0}")]
    ParseFailure(String),

    /// A command was issued while the broker connection is down.
    #[error("mqtt broker is not connected")]
    NotConnected,

    /// The MQTT client refused the request (queue full, client closed).
    #[error("mqtt transport error: {0}")]
    Transport(String),
}

impl From<rumqttc::ClientError> for HubError {
    fn from(e: rumqttc::ClientError) -> Self {
        HubError::Transport(e.to_string())
    }
}
