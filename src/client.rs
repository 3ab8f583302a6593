//! Client side of the control socket, used by CLI front-ends and the
//! integration tests.

use crate::protocol::{self, SpeedSelection, StatusReply};
use anyhow::{Context, Result, bail};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use tracing::debug;

pub struct Client {
    socket_path: PathBuf,
}

impl Client {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Send one framed request and return the parsed reply. Error replies
    /// from the daemon become errors carrying the daemon's message.
    fn roundtrip(&self, request: serde_json::Value) -> Result<serde_json::Value> {
        debug!("Connecting to daemon at {:?}", self.socket_path);
        let mut stream = UnixStream::connect(&self.socket_path).with_context(|| {
            format!(
                "cannot connect to {:?}; is the daemon running?",
                self.socket_path
            )
        })?;

        protocol::write_frame(&mut stream, &serde_json::to_vec(&request)?)?;
        let reply = protocol::read_frame(&mut stream)?;
        let value: serde_json::Value =
            serde_json::from_slice(&reply).context("malformed reply from daemon")?;

        if let Some(message) = value.get("Error").and_then(|e| e.as_str()) {
            bail!("{}", message);
        }
        Ok(value)
    }

    /// Set one fan (or all fans, when `fan` is `None`) to a fixed
    /// percentage or back to automatic control.
    pub fn set_fan_speed(&self, fan: Option<usize>, speed: SpeedSelection) -> Result<()> {
        let mut request = serde_json::json!({ "Command": "set-fan-speed" });
        request["Speed"] = match speed {
            SpeedSelection::Auto => "auto".into(),
            SpeedSelection::Fixed(percent) => percent.into(),
        };
        if let Some(fan) = fan {
            request["Fan"] = fan.into();
        }
        self.roundtrip(request).map(|_| ())
    }

    pub fn status(&self) -> Result<StatusReply> {
        let value = self.roundtrip(serde_json::json!({ "Command": "status" }))?;
        serde_json::from_value(value).context("malformed status reply")
    }

    /// Send an arbitrary request object. Exposed for testing the server's
    /// validation behavior.
    pub fn send_raw(&self, request: serde_json::Value) -> Result<serde_json::Value> {
        self.roundtrip(request)
    }
}
