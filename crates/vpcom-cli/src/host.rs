//! Parsing and dispatch of host command lines
//!
//! One command per line, case-insensitive: `Run`, `Stop`, `Switch 12`,
//! `SetSwitch 12 true`, `Mech 3`, `SetMech 3`, `GetMech 3`,
//! `ChangedSolenoids`, `ChangedLamps`, `ChangedGIStrings`, `getGIStates`,
//! `getLampStates`, `getCoilStates`.

use serde_json::{Value, json};
use vpcom_controller::{BridgeError, Controller};

/// One parsed host call
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Run(Option<String>),
    Stop,
    Switch(u32),
    SetSwitch(u32, Value),
    Mech(u32),
    SetMech(u32),
    GetMech(u32),
    ChangedSolenoids,
    ChangedLamps,
    ChangedGiStrings,
    GiStates,
    LampStates,
    CoilStates,
}

impl HostCall {
    /// Parse a line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let call = match command.to_ascii_lowercase().as_str() {
            "run" => HostCall::Run((!args.is_empty()).then(|| args.join(" "))),
            "stop" => HostCall::Stop,
            "switch" => HostCall::Switch(number(&args)?),
            "setswitch" => {
                let value = args
                    .get(1)
                    .ok_or_else(|| "SetSwitch needs a number and a value".to_string())?;
                HostCall::SetSwitch(number(&args)?, parse_value(value))
            }
            "mech" => HostCall::Mech(number(&args)?),
            "setmech" => HostCall::SetMech(number(&args)?),
            "getmech" => HostCall::GetMech(number(&args)?),
            "changedsolenoids" => HostCall::ChangedSolenoids,
            "changedlamps" => HostCall::ChangedLamps,
            "changedgistrings" => HostCall::ChangedGiStrings,
            "getgistates" => HostCall::GiStates,
            "getlampstates" => HostCall::LampStates,
            "getcoilstates" => HostCall::CoilStates,
            _ => return Err(format!("unknown command: {}", command)),
        };
        Ok(Some(call))
    }

    /// Invoke the call on the controller
    pub fn execute(self, controller: &Controller) -> Result<Value, BridgeError> {
        match self {
            HostCall::Run(extra) => controller.run(extra.as_deref()).map(Value::Bool),
            HostCall::Stop => controller.stop().map(Value::Bool),
            HostCall::Switch(n) => controller.switch(n),
            HostCall::SetSwitch(n, value) => controller.set_switch(n, value),
            HostCall::Mech(n) => controller.mech(n),
            HostCall::SetMech(n) => controller.set_mech(n),
            HostCall::GetMech(n) => controller.get_mech(n),
            HostCall::ChangedSolenoids => controller.changed_solenoids(),
            HostCall::ChangedLamps => controller.changed_lamps(),
            HostCall::ChangedGiStrings => controller.changed_gi_strings(),
            HostCall::GiStates => controller.gi_states(),
            HostCall::LampStates => controller.lamp_states(),
            HostCall::CoilStates => controller.coil_states(),
        }
    }
}

fn number(args: &[&str]) -> Result<u32, String> {
    let arg = args.first().ok_or_else(|| "missing number".to_string())?;
    arg.parse()
        .map_err(|_| format!("invalid number: {}", arg))
}

/// JSON literal if it parses, otherwise the raw text
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// JSON line reporting the outcome of a call
pub fn reply(outcome: Result<Value, BridgeError>) -> Value {
    match outcome {
        Ok(value) => json!({ "ok": value }),
        Err(e) => error_reply(e.kind(), &e.to_string()),
    }
}

pub fn error_reply(kind: &str, message: &str) -> Value {
    json!({ "error": { "kind": kind, "message": message } })
}
