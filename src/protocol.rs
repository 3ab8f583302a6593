//! Control socket wire format: 4-byte big-endian length prefix followed by
//! a UTF-8 JSON document, and the command/reply types carried inside.

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Well-known control socket location.
pub const SOCKET_PATH: &str = "/var/run/ecfan.sock";

/// Upper bound on a single frame.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

pub fn read_frame(stream: &mut impl Read) -> Result<Vec<u8>> {
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .context("failed to read frame header")?;
    let len = u32::from_be_bytes(header) as usize;
    ensure!(
        len > 0 && len <= MAX_FRAME_LEN,
        "frame length {} out of bounds",
        len
    );
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).context("truncated frame")?;
    Ok(payload)
}

pub fn write_frame(stream: &mut impl Write, payload: &[u8]) -> Result<()> {
    ensure!(
        payload.len() <= MAX_FRAME_LEN,
        "frame length {} out of bounds",
        payload.len()
    );
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .context("failed to write frame header")?;
    stream.write_all(payload).context("failed to write frame")?;
    stream.flush().context("failed to flush frame")?;
    Ok(())
}

/// A parsed, validated client command.
#[derive(Debug, PartialEq)]
pub enum Command {
    SetFanSpeed {
        fan: Option<usize>,
        speed: SpeedSelection,
    },
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedSelection {
    Auto,
    Fixed(f64),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetFanSpeedRequest {
    #[serde(rename = "Command")]
    _command: String,
    #[serde(rename = "Fan")]
    fan: Option<i64>,
    #[serde(rename = "Speed")]
    speed: SpeedValue,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SpeedValue {
    Number(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusRequest {
    #[serde(rename = "Command")]
    _command: String,
}

/// Parse one framed JSON payload into a command. Unknown keys and unknown
/// commands are rejected.
pub fn parse_command(payload: &[u8]) -> Result<Command> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).context("malformed JSON message")?;
    let name = value
        .get("Command")
        .and_then(|c| c.as_str())
        .context("message has no Command")?;

    match name {
        "set-fan-speed" => {
            let request: SetFanSpeedRequest =
                serde_json::from_value(value.clone()).context("invalid set-fan-speed message")?;
            let speed = match request.speed {
                SpeedValue::Number(n) if (0.0..=100.0).contains(&n) => SpeedSelection::Fixed(n),
                SpeedValue::Text(s) if s == "auto" => SpeedSelection::Auto,
                _ => bail!("Speed: Invalid value"),
            };
            let fan = match request.fan {
                None => None,
                Some(i) if i >= 0 => Some(i as usize),
                Some(_) => bail!("Fan: Invalid value"),
            };
            Ok(Command::SetFanSpeed { fan, speed })
        }
        "status" => {
            let _: StatusRequest =
                serde_json::from_value(value.clone()).context("invalid status message")?;
            Ok(Command::Status)
        }
        other => bail!("unknown command: {}", other),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OkReply {
    #[serde(rename = "Status")]
    pub status: String,
}

impl OkReply {
    pub fn new() -> Self {
        Self {
            status: "OK".to_string(),
        }
    }
}

impl Default for OkReply {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorReply {
    #[serde(rename = "Error")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusReply {
    #[serde(rename = "PID")]
    pub pid: u32,
    pub selected_config_id: String,
    pub read_only: bool,
    pub fans: Vec<FanStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FanStatus {
    pub name: String,
    pub temperature: f64,
    pub auto_mode: bool,
    pub critical: bool,
    pub current_speed: f64,
    pub target_speed: f64,
    pub requested_speed: f64,
    pub speed_steps: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, br#"{"Command":"status"}"#).unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 20]);

        let mut cursor = Cursor::new(buf);
        let payload = read_frame(&mut cursor).unwrap();
        assert_eq!(payload, br#"{"Command":"status"}"#);
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        buf.extend_from_slice(&[0; 16]);
        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn parses_fixed_speed() {
        let cmd = parse_command(br#"{"Command":"set-fan-speed","Fan":1,"Speed":42.5}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetFanSpeed {
                fan: Some(1),
                speed: SpeedSelection::Fixed(42.5)
            }
        );
    }

    #[test]
    fn parses_auto_speed_for_all_fans() {
        let cmd = parse_command(br#"{"Command":"set-fan-speed","Speed":"auto"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetFanSpeed {
                fan: None,
                speed: SpeedSelection::Auto
            }
        );
    }

    #[test]
    fn out_of_range_speed_is_invalid() {
        let err = parse_command(br#"{"Command":"set-fan-speed","Speed":150}"#).unwrap_err();
        assert_eq!(err.to_string(), "Speed: Invalid value");
    }

    #[test]
    fn non_auto_string_speed_is_invalid() {
        let err = parse_command(br#"{"Command":"set-fan-speed","Speed":"fast"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Speed: Invalid value");
    }

    #[test]
    fn negative_fan_index_is_invalid() {
        let err = parse_command(br#"{"Command":"set-fan-speed","Fan":-1,"Speed":10}"#).unwrap_err();
        assert_eq!(err.to_string(), "Fan: Invalid value");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err =
            parse_command(br#"{"Command":"set-fan-speed","Speed":10,"Bogus":1}"#).unwrap_err();
        assert!(format!("{:#}", err).contains("invalid set-fan-speed message"));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = parse_command(br#"{"Command":"reboot"}"#).unwrap_err();
        assert_eq!(err.to_string(), "unknown command: reboot");
    }

    #[test]
    fn status_reply_uses_wire_field_names() {
        let reply = StatusReply {
            pid: 1234,
            selected_config_id: "Example".to_string(),
            read_only: false,
            fans: vec![FanStatus {
                name: "Fan #0".to_string(),
                temperature: 55.5,
                auto_mode: true,
                critical: false,
                current_speed: 40.0,
                target_speed: 50.0,
                requested_speed: 0.0,
                speed_steps: 6,
            }],
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["PID"], 1234);
        assert_eq!(json["SelectedConfigId"], "Example");
        assert_eq!(json["Fans"][0]["AutoMode"], true);
        assert_eq!(json["Fans"][0]["SpeedSteps"], 6);
    }
}
