use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// External control commands. Handlers never mutate engine state inline;
/// commands are queued and executed by the coordinator between ticks.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    PauseNewEntries,
    Resume,
    CloseSymbol { symbol: String, reason: String },
    CloseAll { reason: String },
    UpdateConfig { param: String, value: Value },
    ToggleKillSwitch { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub ok: bool,
    pub message: String,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

pub struct ControlRequest {
    pub command: ControlCommand,
    pub reply: Option<oneshot::Sender<CommandResult>>,
}

/// Cheap cloneable handle external surfaces use to reach the engine.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlRequest>,
}

impl ControlHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ControlRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueue a command and await its structured result.
    pub async fn execute(&self, command: ControlCommand) -> CommandResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ControlRequest {
            command,
            reply: Some(reply_tx),
        };
        if self.tx.send(request).await.is_err() {
            return CommandResult::err("engine not running");
        }
        reply_rx
            .await
            .unwrap_or_else(|_| CommandResult::err("engine dropped command"))
    }

    /// Fire-and-forget variant for shutdown paths.
    pub async fn enqueue(&self, command: ControlCommand) {
        let _ = self
            .tx
            .send(ControlRequest {
                command,
                reply: None,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_roundtrip() {
        let (handle, mut rx) = ControlHandle::channel(8);

        let server = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert!(matches!(request.command, ControlCommand::PauseNewEntries));
            if let Some(reply) = request.reply {
                let _ = reply.send(CommandResult::ok("paused"));
            }
        });

        let result = handle.execute(ControlCommand::PauseNewEntries).await;
        assert!(result.ok);
        assert_eq!(result.message, "paused");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dead_engine_reports_error() {
        let (handle, rx) = ControlHandle::channel(1);
        drop(rx);
        let result = handle.execute(ControlCommand::Resume).await;
        assert!(!result.ok);
    }

    #[test]
    fn test_commands_serialize_for_audit() {
        let cmd = ControlCommand::UpdateConfig {
            param: "entry_score_min".to_string(),
            value: Value::from(60.0),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["command"], "update_config");
        assert_eq!(json["param"], "entry_score_min");
    }
}
