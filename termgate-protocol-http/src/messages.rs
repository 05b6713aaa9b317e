use serde::{Deserialize, Serialize};

use crate::heuristics::InteractiveState;

/// Inbound frames from the browser. `data` and `input` are accepted
/// interchangeably for keystroke payloads.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Connect {
        connection_id: String,
    },
    #[serde(alias = "input")]
    Data {
        data: String,
    },
    Resize {
        cols: u32,
        rows: u32,
    },
    WatchCommand,
    StopWatch,
    Disconnect,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status {
        content: String,
    },
    Connected {
        content: String,
    },
    Output {
        data: String,
    },
    Pong {
        timestamp: i64,
    },
    InteractiveDetected {
        interactive_type: InteractiveState,
        output: String,
        hint: Hint,
    },
    CommandFinished {
        output: String,
        detection: Detection,
    },
    Disconnected {
        content: String,
    },
    Error {
        content: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Detection {
    Prompt,
    IdleTimeout,
    TotalTimeout,
    EmptyTimeout,
    ProcessExit,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Hint {
    pub message: String,
    pub actions: Vec<HintAction>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HintAction {
    pub label: String,
    pub data: String,
}

impl HintAction {
    pub fn new(label: &str, data: &str) -> Self {
        Self {
            label: label.to_owned(),
            data: data.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping","timestamp":123}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Ping {
                timestamp: Some(123)
            }
        );
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping { timestamp: None });
    }

    #[test]
    fn test_parse_data_and_input_alias() {
        let data: ClientMessage = serde_json::from_str(r#"{"type":"data","data":"ls\r"}"#).unwrap();
        let input: ClientMessage =
            serde_json::from_str(r#"{"type":"input","data":"ls\r"}"#).unwrap();
        assert_eq!(data, input);
        assert_eq!(
            data,
            ClientMessage::Data {
                data: "ls\r".to_owned()
            }
        );
    }

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"watch_command"}"#).unwrap(),
            ClientMessage::WatchCommand
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"stop_watch"}"#).unwrap(),
            ClientMessage::StopWatch
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"disconnect"}"#).unwrap(),
            ClientMessage::Disconnect
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"resize","cols":80,"rows":24}"#)
                .unwrap(),
            ClientMessage::Resize { cols: 80, rows: 24 }
        );
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"telemetry"}"#).unwrap(),
            ClientMessage::Unknown
        );
    }

    #[test]
    fn test_bad_json_is_an_error() {
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_outbound_wire_shapes() {
        let json = serde_json::to_value(ServerMessage::Output {
            data: "hi".to_owned(),
        })
        .unwrap();
        assert_eq!(json["type"], "output");
        assert_eq!(json["data"], "hi");

        let json = serde_json::to_value(ServerMessage::CommandFinished {
            output: "done".to_owned(),
            detection: Detection::IdleTimeout,
        })
        .unwrap();
        assert_eq!(json["type"], "command_finished");
        assert_eq!(json["detection"], "idle_timeout");

        let json = serde_json::to_value(ServerMessage::InteractiveDetected {
            interactive_type: InteractiveState::Pager,
            output: "(END)".to_owned(),
            hint: crate::heuristics::hint_for(InteractiveState::Pager).unwrap(),
        })
        .unwrap();
        assert_eq!(json["type"], "interactive_detected");
        assert_eq!(json["interactive_type"], "pager");
        assert_eq!(json["hint"]["actions"][0]["data"], "q");
    }
}
