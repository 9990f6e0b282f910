//! JSON-lines command protocol
//!
//! Each stdin line is one [`Command`]; each produces exactly one
//! [`Response`] line on stdout.

use moderator::{
    ActionKind, ActionTarget, EngineError, LobbyOptions, Role, SessionManager, Submission,
    VoteKind,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Create {
        room: String,
        #[serde(default)]
        options: LobbyOptions,
    },
    Join {
        room: String,
        player: String,
        name: String,
    },
    Leave {
        room: String,
        player: String,
    },
    Start {
        room: String,
        #[serde(default)]
        roles: Option<Vec<Role>>,
    },
    Act {
        room: String,
        player: String,
        action: ActionKind,
        #[serde(default = "no_target")]
        target: ActionTarget,
    },
    Vote {
        room: String,
        player: String,
        #[serde(default)]
        target: String,
        kind: VoteKind,
    },
    Shoot {
        room: String,
        player: String,
        target: String,
    },
    Advance {
        room: String,
    },
    Terminate {
        room: String,
    },
    Snapshot {
        room: String,
    },
    Whoami {
        room: String,
        player: String,
    },
    Log {
        room: String,
    },
    Rooms,
}

fn no_target() -> ActionTarget {
    ActionTarget::None
}

/// One reply line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok { data: Value },
    Duplicate,
    Ignored,
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    fn ok<T: Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Response::Ok { data },
            Err(e) => Response::error("ENCODE_FAILED", e.to_string()),
        }
    }

    fn submission<T: Serialize>(submission: Submission<T>) -> Self {
        match submission {
            Submission::Accepted(value) => Self::ok(value),
            Submission::AlreadyClaimed => Response::Duplicate,
            Submission::Ignored => Response::Ignored,
        }
    }
}

impl From<EngineError> for Response {
    fn from(err: EngineError) -> Self {
        Response::error(err.code(), err.to_string())
    }
}

/// Parse one input line
pub fn parse(line: &str) -> Result<Command, Response> {
    serde_json::from_str(line).map_err(|e| Response::error("BAD_COMMAND", e.to_string()))
}

/// Run a command against the engine
pub async fn dispatch(manager: &SessionManager, command: Command) -> Response {
    let result = match command {
        Command::Create { room, options } => {
            manager.create_session(&room, options).await.map(Response::ok)
        }
        Command::Join { room, player, name } => manager
            .join_session(&room, &player, &name)
            .await
            .map(Response::ok),
        Command::Leave { room, player } => manager
            .leave_session(&room, &player)
            .await
            .map(Response::ok),
        Command::Start { room, roles } => manager.start_session(&room, roles).await.map(Response::ok),
        Command::Act {
            room,
            player,
            action,
            target,
        } => manager
            .submit_night_action(&room, &player, action, target)
            .await
            .map(Response::submission),
        Command::Vote {
            room,
            player,
            target,
            kind,
        } => manager
            .submit_vote(&room, &player, &target, kind)
            .await
            .map(Response::submission),
        Command::Shoot {
            room,
            player,
            target,
        } => manager
            .submit_revenge_shot(&room, &player, &target)
            .await
            .map(Response::submission),
        Command::Advance { room } => manager.advance(&room).await.map(Response::submission),
        Command::Terminate { room } => manager.force_terminate(&room).await.map(Response::ok),
        Command::Snapshot { room } => manager.snapshot(&room).await.map(Response::ok),
        Command::Whoami { room, player } => manager
            .private_view(&room, &player)
            .await
            .map(Response::ok),
        Command::Log { room } => manager.action_log(&room).await.map(Response::ok),
        Command::Rooms => Ok(Response::ok(manager.active_rooms().await)),
    };
    result.unwrap_or_else(Response::from)
}
