//! Mapping from controller operations to command and response names

use crate::message::{Command, Params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operation names understood by the peer
pub mod ops {
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const SWITCH: &str = "Switch";
    pub const SET_SWITCH: &str = "SetSwitch";
    pub const MECH: &str = "Mech";
    pub const SET_MECH: &str = "SetMech";
    pub const GET_MECH: &str = "GetMech";
    pub const CHANGED_SOLENOIDS: &str = "ChangedSolenoids";
    pub const CHANGED_LAMPS: &str = "ChangedLamps";
    pub const CHANGED_GI_STRINGS: &str = "ChangedGIStrings";
    pub const GET_GI_STATES: &str = "getGIStates";
    pub const GET_LAMP_STATES: &str = "getLampStates";
    pub const GET_COIL_STATES: &str = "getCoilStates";
}

/// Command name used by the subcommand dialect
pub const BRIDGE_COMMAND: &str = "vpcom_bridge";

/// Suffix appended to a command name to form its response name
pub const RESPONSE_SUFFIX: &str = "_response";

/// How operations are named on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dialect {
    /// `Op` answered by `Op_response`
    #[default]
    Named,
    /// `vpcom_bridge` with `subcommand=Op`, answered by `vpcom_bridge_response`
    Subcommand,
}

impl Dialect {
    /// Build the command for an operation
    pub fn command(self, op: &str, params: Params) -> Command {
        match self {
            Dialect::Named => Command {
                name: op.to_string(),
                params,
            },
            Dialect::Subcommand => {
                let mut command = Command::new(BRIDGE_COMMAND).with_param("subcommand", op);
                command.params.extend(params);
                command
            }
        }
    }

    /// Name of the event answering an operation
    pub fn response_name(self, op: &str) -> String {
        match self {
            Dialect::Named => format!("{op}{RESPONSE_SUFFIX}"),
            Dialect::Subcommand => format!("{BRIDGE_COMMAND}{RESPONSE_SUFFIX}"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "named" => Ok(Dialect::Named),
            "subcommand" => Ok(Dialect::Subcommand),
            other => Err(format!("unknown dialect '{other}'")),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Named => f.write_str("named"),
            Dialect::Subcommand => f.write_str("subcommand"),
        }
    }
}
