//! Scripted input for headless runs.
//!
//! One event per line: `<tick> <event> [args]`, where event is one of `keydown <code>`,
//! `keyup <code>`, `mousedown`, `mouseup`, `mousemove <x> <y>`. Blank lines and `#` comments
//! are ignored. Events apply before the tick with the same index.

use std::collections::BTreeMap;

use thiserror::Error;

use super::InputEvent;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("input script line {line}: {message}")]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct InputScript {
    events: BTreeMap<u64, Vec<InputEvent>>,
}

impl InputScript {
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        let mut script = InputScript::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let err = |message: String| ScriptError {
                line: idx + 1,
                message,
            };

            let mut words = line.split_whitespace();
            let tick = words
                .next()
                .and_then(|w| w.parse::<u64>().ok())
                .ok_or_else(|| err("expected a tick number".to_string()))?;
            let kind = words
                .next()
                .ok_or_else(|| err("expected an event name".to_string()))?;
            let mut arg = |what: &str| -> Result<i64, ScriptError> {
                words
                    .next()
                    .and_then(|w| w.parse::<i64>().ok())
                    .ok_or_else(|| err(format!("`{kind}` expects {what}")))
            };

            let event = match kind {
                "keydown" => InputEvent::KeyDown(key_code(arg("a key code")?).map_err(err)?),
                "keyup" => InputEvent::KeyUp(key_code(arg("a key code")?).map_err(err)?),
                "mousedown" => InputEvent::MouseDown,
                "mouseup" => InputEvent::MouseUp,
                "mousemove" => {
                    let x = arg("x and y")?;
                    let y = arg("x and y")?;
                    InputEvent::MouseMove {
                        x: coord(x).map_err(err)?,
                        y: coord(y).map_err(err)?,
                    }
                }
                other => return Err(err(format!("unknown event `{other}`"))),
            };
            if words.next().is_some() {
                return Err(err(format!("trailing arguments after `{kind}`")));
            }
            script.events.entry(tick).or_default().push(event);
        }
        Ok(script)
    }

    /// Events scheduled before `tick`, in file order.
    pub fn events_at(&self, tick: u64) -> &[InputEvent] {
        self.events.get(&tick).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn key_code(value: i64) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("key code {value} out of range"))
}

fn coord(value: i64) -> Result<i32, String> {
    i32::try_from(value).map_err(|_| format!("coordinate {value} out of range"))
}
